use anyhow::{bail, Context, Result};
use reqwest::{Certificate, Identity};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CA_CERT_VAR: &str = "FORWARDTESTS_MTLS_CA_CERT";
const CLIENT_CERT_VAR: &str = "FORWARDTESTS_MTLS_CLIENT_CERT";
const CLIENT_KEY_VAR: &str = "FORWARDTESTS_MTLS_CLIENT_KEY";

/// PEM files used for mutual TLS towards the candlesticks, ticks and callback services.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MtlsFiles {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl MtlsFiles {
    pub fn from_env() -> Self {
        let path = |var: &str| {
            std::env::var(var)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from)
        };
        Self {
            ca_cert: path(CA_CERT_VAR),
            client_cert: path(CLIENT_CERT_VAR),
            client_key: path(CLIENT_KEY_VAR),
        }
    }

    fn root_certificate(&self) -> Result<Option<Certificate>> {
        self.ca_cert
            .as_ref()
            .map(|path| {
                let pem = read_pem(path, "CA certificate")?;
                Certificate::from_pem(&pem)
                    .with_context(|| format!("invalid CA certificate in {}", path.display()))
            })
            .transpose()
    }

    /// Certificate and key are concatenated into the single PEM bundle rustls expects.
    fn identity(&self) -> Result<Option<Identity>> {
        let (cert, key) = match (&self.client_cert, &self.client_key) {
            (None, None) => return Ok(None),
            (Some(cert), Some(key)) => (cert, key),
            _ => bail!(
                "{} and {} have to be set together",
                CLIENT_CERT_VAR,
                CLIENT_KEY_VAR
            ),
        };
        let mut bundle = read_pem(cert, "client certificate")?;
        if bundle.last() != Some(&b'\n') {
            bundle.push(b'\n');
        }
        bundle.extend(read_pem(key, "client key")?);
        let identity = Identity::from_pem(&bundle).with_context(|| {
            format!(
                "invalid client identity in {} / {}",
                cert.display(),
                key.display()
            )
        })?;
        Ok(Some(identity))
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {} {}", what, path.display()))
}

/// Client shared by the candlesticks, ticks and callback adapters.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    build_client_with(timeout, &MtlsFiles::from_env())
}

pub fn build_client_with(timeout: Duration, mtls: &MtlsFiles) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(certificate) = mtls.root_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    if let Some(identity) = mtls.identity()? {
        log::debug!("Outbound HTTP clients use mutual TLS");
        builder = builder.identity(identity);
    }
    builder.build().context("failed to build HTTP client")
}

pub fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_lose_trailing_slashes() {
        assert_eq!(
            trim_base_url(" http://localhost:9001/ "),
            "http://localhost:9001"
        );
        assert_eq!(trim_base_url("http://candles"), "http://candles");
    }

    #[test]
    fn client_identity_needs_both_files() {
        let mtls = MtlsFiles {
            client_cert: Some(PathBuf::from("/etc/forwardtests/client.pem")),
            ..MtlsFiles::default()
        };
        let err = build_client_with(Duration::from_secs(1), &mtls).unwrap_err();
        assert!(err.to_string().contains(CLIENT_KEY_VAR));

        assert!(build_client_with(Duration::from_secs(1), &MtlsFiles::default()).is_ok());
    }
}

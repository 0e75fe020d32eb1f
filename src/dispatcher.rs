use crate::http_client::{build_client, trim_base_url};
use crate::tasks::{ChildTask, TaskDispatcher, TASK_ID_HEADER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Hands callback tasks to the callback workers over HTTP:
/// `POST <base>/queues/<task queue>/tasks/<name>` with the JSON payload.
pub struct HttpTaskDispatcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTaskDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }

    fn task_url(&self, task: &ChildTask) -> String {
        format!(
            "{}/queues/{}/tasks/{}",
            self.base_url, task.task_queue, task.name
        )
    }

    fn request(&self, task: &ChildTask) -> reqwest::RequestBuilder {
        self.http
            .post(self.task_url(task))
            .header(TASK_ID_HEADER, task.id.as_str())
            .timeout(task.timeout)
            .json(&task.payload)
    }
}

#[async_trait]
impl TaskDispatcher for HttpTaskDispatcher {
    async fn execute(&self, task: &ChildTask) -> Result<()> {
        let url = self.task_url(task);
        self.request(task)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} returned error for task {}", url, task.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ParentClosePolicy;

    #[test]
    fn tasks_are_posted_to_their_queue() {
        let dispatcher =
            HttpTaskDispatcher::new("http://callbacks:9003/", Duration::from_secs(5)).unwrap();
        let task = ChildTask::new(
            "forwardtest-x-init".to_string(),
            "user-queue",
            "OnInit",
            Duration::from_secs(30),
            ParentClosePolicy::Terminate,
            &serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(
            dispatcher.task_url(&task),
            "http://callbacks:9003/queues/user-queue/tasks/OnInit"
        );

        let request = dispatcher.request(&task).build().unwrap();
        assert_eq!(
            request.headers().get(TASK_ID_HEADER).unwrap(),
            "forwardtest-x-init"
        );
        assert_eq!(request.timeout(), Some(&Duration::from_secs(30)));
    }
}

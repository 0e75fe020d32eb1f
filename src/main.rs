use anyhow::Result;
use clap::{Parser, Subcommand};
use forwardtests::{
    commands::{migrate, operation, operation::parse_json_arg, serve},
    config::ServiceConfig,
    context::AppContext,
    models::{Order, OrderSide, OrderType},
    operations::{CreateOrderParams, ForwardtestRef, Operation, SubscribeParams},
    NewForwardtestParams,
};
use log::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "forwardtests")]
#[command(about = "Forward test service: simulated accounts run against live prices")]
struct Cli {
    /// Keep forward tests and task claims in process memory instead of PostgreSQL
    #[arg(long, global = true)]
    in_memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the task worker for this service's queue
    Serve,
    /// Create or update the database schema
    Migrate,
    /// Create a forward test
    Create {
        /// Accounts per exchange, e.g. '{"binance": {"balances": {"USDT": 1000}}}'
        #[arg(long)]
        accounts: String,
        /// on_init, on_new_prices and on_exit callback descriptors as JSON
        #[arg(long)]
        callbacks: String,
    },
    /// List forward tests, newest first
    List,
    /// Show one forward test
    Get { id: Uuid },
    /// Show the accounts of a forward test
    Accounts { id: Uuid },
    /// Value every account of a forward test in USDT
    Balance { id: Uuid },
    /// Execute a market order at the current price
    Order {
        id: Uuid,
        #[arg(long)]
        exchange: String,
        #[arg(long)]
        pair: String,
        /// buy or sell
        #[arg(long)]
        side: String,
        #[arg(long)]
        quantity: f64,
        /// Order type; only market orders are supported
        #[arg(long = "type", default_value = "market")]
        order_type: String,
        /// Client-chosen order id; generated when omitted
        #[arg(long)]
        order_id: Option<Uuid>,
    },
    /// Start a forward test and run its init callback
    Start { id: Uuid },
    /// Stop a forward test and run its exit callback
    Stop { id: Uuid },
    /// Forward price ticks of a pair to the forward test
    Subscribe {
        id: Uuid,
        #[arg(long)]
        exchange: String,
        #[arg(long)]
        pair: String,
    },
    /// Delete a forward test
    Delete { id: Uuid },
    /// Print the service version
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { in_memory, command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::from_env()?;
    let app_context = AppContext::initialize(config, in_memory)?;
    info!("Starting forwardtests {}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Serve => serve::run(&app_context).await?,
        Commands::Migrate => migrate::run(&app_context).await?,
        other => operation::run(&app_context, build_operation(other)?).await?,
    }

    Ok(())
}

fn build_operation(command: Commands) -> Result<Operation> {
    let operation = match command {
        Commands::Create {
            accounts,
            callbacks,
        } => Operation::CreateForwardtest(NewForwardtestParams {
            accounts: parse_json_arg("accounts", &accounts)?,
            callbacks: parse_json_arg("callbacks", &callbacks)?,
        }),
        Commands::List => Operation::ListForwardtests,
        Commands::Get { id } => Operation::GetForwardtest(ForwardtestRef { forwardtest_id: id }),
        Commands::Accounts { id } => {
            Operation::ListForwardtestAccounts(ForwardtestRef { forwardtest_id: id })
        }
        Commands::Balance { id } => {
            Operation::GetForwardtestBalance(ForwardtestRef { forwardtest_id: id })
        }
        Commands::Order {
            id,
            exchange,
            pair,
            side,
            quantity,
            order_type,
            order_id,
        } => {
            let order_type = order_type.parse::<OrderType>()?;
            let mut order = Order::market(side.parse::<OrderSide>()?, &exchange, &pair, quantity);
            order.order_type = order_type;
            order.id = order_id;
            Operation::CreateForwardtestOrder(CreateOrderParams {
                forwardtest_id: id,
                order,
            })
        }
        Commands::Start { id } => Operation::StartForwardtest(ForwardtestRef { forwardtest_id: id }),
        Commands::Stop { id } => Operation::StopForwardtest(ForwardtestRef { forwardtest_id: id }),
        Commands::Subscribe {
            id,
            exchange,
            pair,
        } => Operation::SubscribeToPrice(SubscribeParams {
            forwardtest_id: id,
            exchange,
            pair,
        }),
        Commands::Delete { id } => {
            Operation::DeleteForwardtest(ForwardtestRef { forwardtest_id: id })
        }
        Commands::Info => Operation::ServiceInfo,
        Commands::Serve | Commands::Migrate => {
            anyhow::bail!("serve and migrate are not task operations")
        }
    };
    Ok(operation)
}

//! Pop-up store walkthrough
//!
//! Without arguments this runs the full store lifecycle against the
//! in-memory contract: register a token, price an item, pay with the token
//! and with ETH, read balances and the payment log, withdraw.
//!
//! With `--env` or a JSON config file it connects to a deployed store and
//! prints the item page, the balance card and the payment history.

use popup_store::{
    AdminConsole, Checkout, InMemoryGateway, PaymentFeed, StaticPriceOracle, StoreConfig,
    StoreGateway, TokenRegistry,
};
use rust_decimal::Decimal;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const ITEM: &str = "123456789bb";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        None => simulate().await,
        Some("--help") | Some("-h") => {
            eprintln!("Usage: {} [--env | <config_file>] [item_id]", args[0]);
            eprintln!();
            eprintln!("Environment variables:");
            eprintln!("  POPUP_STORE_RPC_URL - JSON-RPC endpoint");
            eprintln!("  POPUP_STORE_ADDRESS - Store contract address");
            eprintln!("  POPUP_STORE_SENDER - Node-managed sending account");
            eprintln!("  POPUP_STORE_PRIVATE_KEY - Key for local signing");
            eprintln!("  POPUP_STORE_NETWORK - hardhat or sepolia");
            eprintln!("  POPUP_STORE_NATIVE_PRICE - Fixed ETH price");
            eprintln!("  POPUP_STORE_FROM_BLOCK - First block of the payment log");
            Ok(())
        }
        Some("--env") => inspect(StoreConfig::from_env()?, args.get(2)).await,
        Some(path) => inspect(StoreConfig::from_file(path)?, args.get(2)).await,
    }
}

async fn simulate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Running against the in-memory store");

    let gateway = Arc::new(InMemoryGateway::default());
    let registry = Arc::new(TokenRegistry::new(gateway.clone()));
    let admin = AdminConsole::new(gateway.clone(), registry.clone());
    let checkout = Checkout::new(
        gateway.clone(),
        registry.clone(),
        Arc::new(StaticPriceOracle::new(Decimal::from(2000))),
        ITEM,
    );

    admin
        .add_token("USDT", "0x7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a")
        .await?;
    admin.set_price(ITEM, "400").await?;

    let view = checkout.load().await?;
    println!("Item {}: {}", view.item.item_id, view.item.display_price());
    for option in &view.options {
        println!("  [{}] {}", option.value, option.label);
    }

    for pick in ["0", "1"] {
        if let Some(outcome) = checkout.pay(&view, pick).await? {
            println!(
                "Paid with {} in {} transaction(s)",
                outcome.method,
                outcome.transactions.len()
            );
        }
    }

    print_balances(&admin).await?;

    let feed = PaymentFeed::new(gateway.clone(), 1);
    for event in feed.history().await? {
        println!(
            "  {} paid {} {} for {}",
            event.payer, event.amount, event.token_name, event.item_id
        );
    }

    let tokens = admin.tokens().await?;
    admin.withdraw(&tokens, "0", "400").await?;
    admin.withdraw(&tokens, "1", "0.2").await?;
    print_balances(&admin).await?;

    let native = gateway.native_balance().await?;
    println!("Contract ETH after withdrawal: {}", native);
    Ok(())
}

async fn inspect(
    config: StoreConfig,
    item_id: Option<&String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = Arc::new(config.build_gateway()?);
    let registry = Arc::new(TokenRegistry::new(gateway.clone()));
    let admin = AdminConsole::new(gateway.clone(), registry.clone());

    if let Some(item_id) = item_id {
        let checkout = Checkout::new(
            gateway.clone(),
            registry.clone(),
            config.build_oracle()?,
            item_id.as_str(),
        )
        .with_slippage_bps(config.slippage_bps);
        let view = checkout.load().await?;
        println!("Item {}: {}", view.item.item_id, view.item.display_price());
        for option in &view.options {
            println!("  [{}] {}", option.value, option.label);
        }
    }

    print_balances(&admin).await?;

    let feed = PaymentFeed::new(gateway, config.from_block);
    let history = feed.history().await?;
    println!("{} payment(s) since block {}", history.len(), feed.from_block());
    for event in history {
        let paid_at = event
            .paid_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!(
            "  {} {} paid {} {} for {}",
            paid_at, event.payer, event.amount, event.token_name, event.item_id
        );
    }
    Ok(())
}

async fn print_balances<G: StoreGateway>(
    admin: &AdminConsole<G>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sheet = admin.balances().await?;
    println!("Balances:");
    for entry in &sheet.entries {
        println!("  {}: {}", entry.label, entry.display_amount());
    }
    Ok(())
}

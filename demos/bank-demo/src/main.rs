//! 转账演示
//!
//! `transferFunds` 经由代理调用 `debit` 与 `credit`，三者都匹配事务切点：
//! 嵌套调用只参与，外层负责一次提交或一次回滚。

mod aspects;
mod service;

use std::sync::Arc;

use serde_json::{json, Value};
use tessera_aop::prelude::*;
use tessera_tx::{DriverRegistry, MemoryDriver, TransactionDriver};

use crate::service::AccountService;

const CONFIG_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/application.toml");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ==================== 配置与日志 ====================

    let config = RuntimeConfig::from_file(CONFIG_PATH)?;
    config.logging.init()?;

    // 共享同一个内存驱动，演示结束后读取它的日志
    let store = Arc::new(MemoryDriver::named("bank"));
    let drivers = DriverRegistry::new();
    let shared = Arc::clone(&store);
    drivers.register(
        "memory",
        Arc::new(move || Arc::clone(&shared) as Arc<dyn TransactionDriver>),
    );

    // ==================== 运行时 ====================

    let runtime = AopRuntime::with_drivers(config, &drivers)?;
    let transactions = runtime
        .transactions()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("transactions must be enabled in {}", CONFIG_PATH))?;

    let service = Arc::new(AccountService::new(
        Arc::downgrade(runtime.proxies()),
        transactions,
        Arc::clone(&store),
    ));
    runtime.register_component(AccountService::NAME, service)?;
    let installed = runtime.install();

    println!("\n🚀 Bank demo started");
    println!("📦 Installed {} proxied method(s):", installed);
    for signature in runtime.proxies().signatures() {
        println!("   - {}", signature);
    }

    // ==================== 开户 ====================

    for (account, amount) in [("alice", 100), ("bob", 20)] {
        let ctx = runtime.start_unit_of_work(format!("open {}", account));
        runtime
            .invoke(&ctx, AccountService::NAME, "openAccount", vec![json!(account), json!(amount)])
            .await?;
    }
    print_balances(&runtime, "after opening accounts").await?;

    // ==================== 转账 ====================

    let transfers = [
        ("alice", "bob", 30, "regular transfer"),
        ("alice", "bob", 500, "overdraft"),
        ("alice", "carol", 10, "unknown payee"),
    ];
    for (from, to, amount, label) in transfers {
        let ctx = runtime.start_unit_of_work(label);
        let args = vec![json!(from), json!(to), json!(amount)];
        match runtime
            .invoke(&ctx, AccountService::NAME, "transferFunds", args)
            .await
        {
            Ok(receipt) => println!("\n✅ {}: {}", label, receipt),
            Err(err) => println!("\n❌ {}: {}", label, err),
        }
        print_balances(&runtime, label).await?;
    }

    // ==================== 驱动统计 ====================

    println!("\n📊 Driver '{}'", store.name());
    println!("   begins: {}", store.begins());
    println!("   commits: {}", store.commits());
    println!("   rollbacks: {}", store.rollbacks());
    println!("   open connections: {}", store.open_connections());
    println!("   journal: {:?}", store.journal());

    let orphans = runtime.shutdown().await;
    println!("\n👋 Shut down, {} orphaned transaction(s)", orphans);
    Ok(())
}

async fn print_balances(runtime: &AopRuntime, stage: &str) -> anyhow::Result<()> {
    let ctx = runtime.start_unit_of_work("balances");
    println!("💰 Balances ({}):", stage);
    for account in ["alice", "bob", "carol"] {
        let balance = runtime
            .invoke(&ctx, AccountService::NAME, "balance", vec![json!(account)])
            .await?;
        match balance {
            Value::Null => println!("   {:<6} -", account),
            balance => println!("   {:<6} {}", account, balance),
        }
    }
    Ok(())
}

//! 账户服务 - 所有写入都经由当前逻辑线程的事务暂存

use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail};
use serde_json::{json, Value};
use tessera_aop::prelude::*;
use tessera_tx::{MemoryDriver, MemorySession, TransactionContextManager};

/// 账户服务
///
/// `transferFunds` 经由代理表调用 `debit` 与 `credit`，三者共享同一个事务。
pub struct AccountService {
    proxies: Weak<ProxyTable>,
    transactions: Arc<TransactionContextManager>,
    store: Arc<MemoryDriver>,
}

impl AccountService {
    pub const NAME: &'static str = "AccountService";

    pub fn new(
        proxies: Weak<ProxyTable>,
        transactions: Arc<TransactionContextManager>,
        store: Arc<MemoryDriver>,
    ) -> Self {
        Self {
            proxies,
            transactions,
            store,
        }
    }

    fn key(account: &str) -> String {
        format!("balance:{}", account)
    }

    /// 已提交的余额
    fn committed_balance(&self, account: &str) -> Option<i64> {
        self.store.get(&Self::key(account)).and_then(|v| v.as_i64())
    }

    /// 在当前事务中暂存余额
    async fn stage(&self, ctx: &CallContext, account: &str, balance: i64) -> anyhow::Result<()> {
        let shared = self
            .transactions
            .current(ctx)
            .ok_or_else(|| anyhow!("no transaction on {}", ctx.thread_id()))?;
        let mut tx = shared.lock().await;
        let session = tx
            .session_mut::<MemorySession>()
            .ok_or_else(|| anyhow!("transaction is not backed by the memory driver"))?;
        session.put(Self::key(account), json!(balance));
        Ok(())
    }

    async fn open_account(&self, ctx: &CallContext, args: Vec<Value>) -> anyhow::Result<Value> {
        let (account, amount) = account_and_amount(&args)?;
        if self.committed_balance(&account).is_some() {
            bail!("account '{}' already exists", account);
        }
        self.stage(ctx, &account, amount).await?;
        Ok(json!({ "account": account, "balance": amount }))
    }

    async fn debit(&self, ctx: &CallContext, args: Vec<Value>) -> anyhow::Result<Value> {
        let (account, amount) = account_and_amount(&args)?;
        let balance = self
            .committed_balance(&account)
            .ok_or_else(|| anyhow!("unknown account '{}'", account))?;
        if balance < amount {
            bail!(
                "insufficient funds in '{}': balance {}, requested {}",
                account,
                balance,
                amount
            );
        }
        self.stage(ctx, &account, balance - amount).await?;
        Ok(json!(balance - amount))
    }

    async fn credit(&self, ctx: &CallContext, args: Vec<Value>) -> anyhow::Result<Value> {
        let (account, amount) = account_and_amount(&args)?;
        let balance = self
            .committed_balance(&account)
            .ok_or_else(|| anyhow!("unknown account '{}'", account))?;
        self.stage(ctx, &account, balance + amount).await?;
        Ok(json!(balance + amount))
    }

    async fn transfer_funds(&self, ctx: &CallContext, args: Vec<Value>) -> anyhow::Result<Value> {
        let [from, to, amount] = args.as_slice() else {
            bail!("transferFunds expects [from, to, amount]");
        };
        let proxies = self
            .proxies
            .upgrade()
            .ok_or_else(|| anyhow!("runtime has shut down"))?;

        let remaining = proxies
            .invoke(ctx, Self::NAME, "debit", vec![from.clone(), amount.clone()])
            .await?;
        proxies
            .invoke(ctx, Self::NAME, "credit", vec![to.clone(), amount.clone()])
            .await?;
        Ok(json!({ "from": from, "to": to, "amount": amount, "remaining": remaining }))
    }

    fn balance(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        let account = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("balance expects [account]"))?;
        Ok(self.committed_balance(account).map(Value::from).unwrap_or(Value::Null))
    }
}

fn account_and_amount(args: &[Value]) -> anyhow::Result<(String, i64)> {
    match args {
        [account, amount] => {
            let account = account
                .as_str()
                .ok_or_else(|| anyhow!("account must be a string, got {}", account))?;
            let amount = amount
                .as_i64()
                .filter(|amount| *amount >= 0)
                .ok_or_else(|| anyhow!("amount must be a non-negative integer, got {}", amount))?;
            Ok((account.to_string(), amount))
        }
        _ => bail!("expected [account, amount], got {} argument(s)", args.len()),
    }
}

impl Component for AccountService {
    fn methods(self: Arc<Self>) -> Vec<(&'static str, Method)> {
        vec![
            (
                "openAccount",
                Method::bind_async(&self, |svc, ctx, args| async move { svc.open_account(&ctx, args).await }),
            ),
            (
                "debit",
                Method::bind_async(&self, |svc, ctx, args| async move { svc.debit(&ctx, args).await }),
            ),
            (
                "credit",
                Method::bind_async(&self, |svc, ctx, args| async move { svc.credit(&ctx, args).await }),
            ),
            (
                "transferFunds",
                Method::bind_async(&self, |svc, ctx, args| async move {
                    svc.transfer_funds(&ctx, args).await
                }),
            ),
            ("balance", Method::bind_sync(&self, |svc, _, args| svc.balance(args))),
        ]
    }
}

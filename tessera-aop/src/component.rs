//! 组件与代理表
//!
//! 组件以名称注册到实例注册表，启动时 [`crate::AopFactory::install`] 扫描所有组件，
//! 把每个方法包装成代理放进 [`ProxyTable`]，请求层之后只通过代理表分派调用。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tessera_core::CallContext;

use crate::error::{InvocationError, MethodResult};
use crate::interceptor::{Method, ProxiedMethod};

/// 可被代理的组件
///
/// ```ignore
/// impl Component for AccountService {
///     fn methods(self: Arc<Self>) -> Vec<(&'static str, Method)> {
///         vec![
///             ("debit", Method::bind_async(&self, |svc, ctx, args| async move { svc.debit(&ctx, args).await })),
///             ("balance", Method::bind_sync(&self, |svc, _, args| svc.balance(args))),
///         ]
///     }
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// 列出要安装的方法
    fn methods(self: Arc<Self>) -> Vec<(&'static str, Method)>;
}

/// 代理表，按 `实例.方法` 索引
#[derive(Default)]
pub struct ProxyTable {
    methods: RwLock<HashMap<String, Arc<ProxiedMethod>>>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入代理，同名代理会被替换
    pub fn insert(&self, proxy: ProxiedMethod) -> Arc<ProxiedMethod> {
        let proxy = Arc::new(proxy);
        let replaced = self
            .methods
            .write()
            .insert(proxy.signature(), Arc::clone(&proxy));
        if replaced.is_some() {
            tracing::warn!("Proxy for {} was replaced", proxy.signature());
        }
        proxy
    }

    pub fn get(&self, instance: &str, method: &str) -> Option<Arc<ProxiedMethod>> {
        self.methods
            .read()
            .get(&format!("{}.{}", instance, method))
            .cloned()
    }

    /// 通过代理调用方法
    pub async fn invoke(
        &self,
        ctx: &CallContext,
        instance: &str,
        method: &str,
        args: Vec<Value>,
    ) -> MethodResult {
        let proxy = self
            .get(instance, method)
            .ok_or_else(|| InvocationError::MethodNotFound {
                instance: instance.to_string(),
                method: method.to_string(),
            })?;
        proxy.call(ctx, args).await
    }

    /// 已安装的方法签名（排序后）
    pub fn signatures(&self) -> Vec<String> {
        let mut signatures: Vec<_> = self.methods.read().keys().cloned().collect();
        signatures.sort();
        signatures
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    pub fn clear(&self) {
        self.methods.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::AdviceBinding;
    use crate::aspect::Aspect;
    use crate::factory::AopFactory;
    use crate::joinpoint::JoinPoint;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::{DefaultInstanceRegistry, InstanceRegistryExt, LogicalThreads};

    struct Greeter {
        greeting: String,
    }

    impl Component for Greeter {
        fn methods(self: Arc<Self>) -> Vec<(&'static str, Method)> {
            vec![
                (
                    "greet",
                    Method::bind_sync(&self, |greeter, _, args| {
                        let name = args.first().and_then(Value::as_str).unwrap_or("world");
                        Ok(json!(format!("{}, {}", greeter.greeting, name)))
                    }),
                ),
                (
                    "shout",
                    Method::bind_async(&self, |greeter, _, _| async move {
                        Ok::<_, anyhow::Error>(json!(greeter.greeting.to_uppercase()))
                    }),
                ),
            ]
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Aspect for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        async fn advise(&self, _method: &str, _join_point: &mut JoinPoint) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn greeter(greeting: &str) -> Arc<dyn Component> {
        Arc::new(Greeter {
            greeting: greeting.to_string(),
        })
    }

    #[tokio::test]
    async fn test_install_sweeps_registered_components() {
        let factory = Arc::new(AopFactory::new(Arc::new(DefaultInstanceRegistry::new())));
        factory.register_component("Greeter", greeter("Hello")).unwrap();
        factory.registry().add_singleton("settings", 3u32).unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        factory.add_aspect("Counter", counter.clone()).unwrap();
        factory.register_pointcut("greetings", &["Greeter.greet"]).unwrap();
        factory
            .add_advice(AdviceBinding::before("greetings", "Counter", "count"))
            .unwrap();

        let table = ProxyTable::new();
        assert_eq!(factory.install(&table), 2);
        assert_eq!(table.signatures(), vec!["Greeter.greet", "Greeter.shout"]);

        let ctx = LogicalThreads::new().next_context();
        let greeting = table
            .invoke(&ctx, "Greeter", "greet", vec![json!("Ada")])
            .await
            .unwrap();
        assert_eq!(greeting, json!("Hello, Ada"));
        assert_eq!(
            table.invoke(&ctx, "Greeter", "shout", vec![]).await.unwrap(),
            json!("HELLO")
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_unknown_method() {
        let table = ProxyTable::new();
        let ctx = LogicalThreads::new().next_context();
        let err = table.invoke(&ctx, "Greeter", "wave", vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            InvocationError::MethodNotFound { ref instance, ref method } if instance == "Greeter" && method == "wave"
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_replaces_same_signature() {
        let factory = Arc::new(AopFactory::new(Arc::new(DefaultInstanceRegistry::new())));
        let table = ProxyTable::new();
        table.insert(factory.wrap("Svc", "run", Method::synchronous(|_, _| Ok(json!(1)))));
        table.insert(factory.wrap("Svc", "run", Method::synchronous(|_, _| Ok(json!(2)))));
        assert_eq!(table.len(), 1);

        table.clear();
        assert!(table.get("Svc", "run").is_none());
    }
}

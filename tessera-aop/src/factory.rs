//! AOP 工厂
//!
//! 持有切点与通知的注册信息，为 `实例.方法` 构建并缓存通知链，并生成方法代理。
//! 工厂是显式创建的对象，由应用启动流程持有并传递，不存在全局注册表。
//!
//! 切面的方法级声明可能先于切面本身被处理，因此声明会先按切面名称排队，
//! 在 [`AopFactory::add_aspect`] 时依次落地：先切点，后通知。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{InstanceRegistry, InstanceRegistryExt};
use tessera_tx::TransactionContextManager;

use crate::advice::{AdviceBinding, AdviceChain, ChainBuilder};
use crate::aspect::{self, Aspect};
use crate::component::{Component, ProxyTable};
use crate::error::{AopResult, ConfigurationError, InvocationError};
use crate::expression::{compile_all, compile_values, MatchExpression};
use crate::interceptor::{Method, ProxiedMethod};
use crate::pointcut::Pointcut;

/// 默认的事务切点 id
pub const DEFAULT_TRANSACTION_POINTCUT: &str = "transaction";

#[derive(Default)]
struct FactoryState {
    /// 按注册顺序排列
    pointcuts: Vec<Pointcut>,
    index: HashMap<String, usize>,
    aspects: HashSet<String>,
    pending: HashMap<String, PendingDeclarations>,
}

#[derive(Default)]
struct PendingDeclarations {
    pointcuts: Vec<(String, Vec<MatchExpression>)>,
    advices: Vec<AdviceBinding>,
}

impl FactoryState {
    fn pointcut_mut(&mut self, id: &str) -> AopResult<&mut Pointcut> {
        let slot = *self
            .index
            .get(id)
            .ok_or_else(|| ConfigurationError::UnknownPointcut(id.to_string()))?;
        Ok(&mut self.pointcuts[slot])
    }

    fn insert(&mut self, pointcut: Pointcut) -> usize {
        let slot = self.pointcuts.len();
        self.index.insert(pointcut.id().to_string(), slot);
        self.pointcuts.push(pointcut);
        slot
    }

    /// 按 id 幂等注册，已存在时追加表达式
    fn upsert(&mut self, id: &str, aspect: Option<&str>, expressions: Vec<MatchExpression>) -> Pointcut {
        let slot = match self.index.get(id).copied() {
            Some(slot) => slot,
            None => {
                tracing::debug!("Registering pointcut: {}", id);
                self.insert(Pointcut::new(id, None))
            }
        };
        let pointcut = &mut self.pointcuts[slot];
        if let Some(aspect) = aspect {
            pointcut.claim(aspect);
        }
        pointcut.extend_expressions(expressions);
        pointcut.clone()
    }

    fn add_advice(&mut self, binding: AdviceBinding) -> AopResult<()> {
        let pointcut = self.pointcut_mut(&binding.pointcut)?;
        tracing::debug!("  ├─ Adding advice: {}", binding);
        pointcut.push_advice(binding);
        Ok(())
    }
}

/// AOP 工厂
pub struct AopFactory {
    registry: Arc<dyn InstanceRegistry>,
    state: RwLock<FactoryState>,
    chains: RwLock<HashMap<String, Arc<AdviceChain>>>,
    transactions: Option<Arc<TransactionContextManager>>,
    transaction_pointcut: Option<String>,
}

impl AopFactory {
    /// 创建新的工厂，切面实例注册到给定的实例注册表中
    pub fn new(registry: Arc<dyn InstanceRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(FactoryState::default()),
            chains: RwLock::new(HashMap::new()),
            transactions: None,
            transaction_pointcut: None,
        }
    }

    /// 启用事务传播，创建带事务标记的切点
    pub fn enable_transactions(
        mut self,
        manager: Arc<TransactionContextManager>,
        pointcut: &str,
    ) -> AopResult<Self> {
        {
            let mut state = self.state.write();
            if state.index.contains_key(pointcut) {
                return Err(ConfigurationError::DuplicatePointcut(pointcut.to_string()));
            }
            state.insert(Pointcut::transaction(pointcut));
        }
        tracing::debug!(
            "Transactions enabled with driver '{}' on pointcut '{}'",
            manager.driver().name(),
            pointcut
        );
        self.transactions = Some(manager);
        self.transaction_pointcut = Some(pointcut.to_string());
        self.invalidate();
        Ok(self)
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.registry
    }

    /// 事务上下文管理器（未启用事务时为 `None`）
    pub fn transactions(&self) -> Option<&Arc<TransactionContextManager>> {
        self.transactions.as_ref()
    }

    pub fn transaction_pointcut(&self) -> Option<&str> {
        self.transaction_pointcut.as_deref()
    }

    // ------------------------------------------------------------------
    // 切点
    // ------------------------------------------------------------------

    /// 注册切点
    ///
    /// 按 id 幂等：已存在时返回已有切点（给定的表达式会被追加），否则新建。
    pub fn register_pointcut(&self, id: &str, expressions: &[&str]) -> AopResult<Pointcut> {
        let compiled = compile_all(id, expressions)?;
        self.upsert(id, None, compiled)
    }

    /// 严格注册切点，id 已存在时失败
    pub fn register_pointcut_strict(&self, id: &str, expressions: &[&str]) -> AopResult<Pointcut> {
        let compiled = compile_all(id, expressions)?;
        let mut state = self.state.write();
        if state.index.contains_key(id) {
            return Err(ConfigurationError::DuplicatePointcut(id.to_string()));
        }
        tracing::debug!("Registering pointcut: {}", id);
        let slot = state.insert(Pointcut::new(id, None));
        let pointcut = &mut state.pointcuts[slot];
        pointcut.extend_expressions(compiled);
        let pointcut = pointcut.clone();
        self.invalidate_locked();
        Ok(pointcut)
    }

    /// 以配置文件中的表达式注册切点
    pub fn register_pointcut_values(&self, id: &str, expressions: &[toml::Value]) -> AopResult<Pointcut> {
        let compiled = compile_values(id, expressions)?;
        self.upsert(id, None, compiled)
    }

    /// 向已有切点追加表达式
    pub fn add_expression(&self, id: &str, expressions: &[&str]) -> AopResult<()> {
        let compiled = compile_all(id, expressions)?;
        self.extend(id, compiled)
    }

    pub fn add_expression_values(&self, id: &str, expressions: &[toml::Value]) -> AopResult<()> {
        let compiled = compile_values(id, expressions)?;
        self.extend(id, compiled)
    }

    /// 把方法表达式加入事务切点
    pub fn mark_transactional(&self, expressions: &[&str]) -> AopResult<()> {
        let id = self.require_transactions()?;
        self.add_expression(id, expressions)
    }

    pub fn mark_transactional_values(&self, expressions: &[toml::Value]) -> AopResult<()> {
        let id = self.require_transactions()?;
        self.add_expression_values(id, expressions)
    }

    /// 按 id 查找切点快照
    pub fn pointcut(&self, id: &str) -> Option<Pointcut> {
        let state = self.state.read();
        state.index.get(id).map(|&slot| state.pointcuts[slot].clone())
    }

    /// 按注册顺序列出切点 id
    pub fn pointcut_ids(&self) -> Vec<String> {
        self.state
            .read()
            .pointcuts
            .iter()
            .map(|p| p.id().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // 通知与切面
    // ------------------------------------------------------------------

    /// 向绑定所引用的切点追加通知
    pub fn add_advice(&self, binding: AdviceBinding) -> AopResult<()> {
        let mut state = self.state.write();
        state.add_advice(binding)?;
        self.invalidate_locked();
        Ok(())
    }

    /// 声明属于某个切面的切点
    ///
    /// 切面已添加时立即注册，否则排队等待 [`AopFactory::add_aspect`]。
    pub fn declare_pointcut(&self, aspect: &str, id: &str, expressions: &[&str]) -> AopResult<()> {
        let compiled = compile_all(id, expressions)?;
        let mut state = self.state.write();
        if state.aspects.contains(aspect) {
            state.upsert(id, Some(aspect), compiled);
            self.invalidate_locked();
        } else {
            tracing::trace!("Queueing pointcut '{}' for aspect {}", id, aspect);
            state
                .pending
                .entry(aspect.to_string())
                .or_default()
                .pointcuts
                .push((id.to_string(), compiled));
        }
        Ok(())
    }

    /// 声明通知，按绑定的目标切面排队
    pub fn declare_advice(&self, binding: AdviceBinding) -> AopResult<()> {
        let mut state = self.state.write();
        if state.aspects.contains(&binding.aspect) {
            state.add_advice(binding)?;
            self.invalidate_locked();
        } else {
            tracing::trace!("Queueing advice {}", binding);
            state
                .pending
                .entry(binding.aspect.clone())
                .or_default()
                .advices
                .push(binding);
        }
        Ok(())
    }

    /// 添加切面
    ///
    /// 落地该切面排队中的切点和通知，并在实例注册表中尚无同名实例时注册切面实例。
    pub fn add_aspect(&self, name: &str, aspect: Arc<dyn Aspect>) -> AopResult<()> {
        {
            let mut state = self.state.write();
            state.aspects.insert(name.to_string());
            let pending = state.pending.remove(name).unwrap_or_default();
            tracing::debug!(
                "Adding aspect: {} ({} queued pointcut(s), {} queued advice(s))",
                name,
                pending.pointcuts.len(),
                pending.advices.len()
            );

            for (id, expressions) in pending.pointcuts {
                state.upsert(&id, Some(name), expressions);
            }
            for binding in pending.advices {
                state.add_advice(binding)?;
            }
            self.invalidate_locked();
        }

        if !self.registry.has_class(name) {
            self.registry.add_singleton(name, aspect)?;
        }
        Ok(())
    }

    /// 按名称从实例注册表解析切面
    pub fn resolve_aspect(&self, name: &str) -> Result<Arc<dyn Aspect>, InvocationError> {
        self.registry
            .get_instance(name)
            .and_then(|instance| instance.downcast::<Arc<dyn Aspect>>().ok())
            .map(|aspect| Arc::clone(aspect.as_ref()))
            .ok_or_else(|| InvocationError::AspectNotFound(name.to_string()))
    }

    /// 从 inventory 加载所有声明式注册的切面、切点与通知
    ///
    /// 声明先排队，再逐个添加切面，因此声明的处理顺序与切面无关。
    /// 返回加载的切面数量。
    pub fn auto_load(&self) -> AopResult<usize> {
        let mut pointcuts: Vec<_> = aspect::get_all_pointcut_declarations().collect();
        pointcuts.sort_by_key(|d| (d.aspect, d.order));
        for declaration in pointcuts {
            self.declare_pointcut(declaration.aspect, declaration.id, declaration.expressions)?;
        }

        let mut advices: Vec<_> = aspect::get_all_advice_declarations().collect();
        advices.sort_by_key(|d| (d.aspect, d.order));
        for declaration in advices {
            self.declare_advice(AdviceBinding::new(
                declaration.advice_type,
                declaration.pointcut,
                declaration.aspect,
                declaration.method,
            ))?;
        }

        let mut registrations: Vec<_> = aspect::get_all_aspect_registrations().collect();
        registrations.sort_by_key(|r| r.name);
        tracing::info!("Auto-loading {} aspect(s) from registry", registrations.len());

        for registration in &registrations {
            tracing::debug!("  ├─ Loading aspect: {}", registration.name);
            self.add_aspect(registration.name, registration.create_instance())?;
        }

        let waiting = self.state.read().pending.len();
        if waiting > 0 {
            tracing::warn!("{} aspect(s) have declarations but were never added", waiting);
        }
        Ok(registrations.len())
    }

    // ------------------------------------------------------------------
    // 通知链
    // ------------------------------------------------------------------

    /// 获取 `实例.方法` 的通知链
    ///
    /// 按切点注册顺序、切点内按通知注册顺序收集；事务切点只贡献 `has_transaction`。
    /// 首次查询时构建并缓存，任何注册变更都会清空缓存。
    pub fn get_advices(&self, instance: &str, method: &str) -> Arc<AdviceChain> {
        let subject = format!("{}.{}", instance, method);
        if let Some(chain) = self.chains.read().get(&subject) {
            return Arc::clone(chain);
        }

        // 持有状态读锁直到写入缓存，避免并发的注册变更被过期的通知链覆盖
        let state = self.state.read();
        let mut builder = ChainBuilder::default();
        for pointcut in state.pointcuts.iter().filter(|p| p.matches(&subject)) {
            if pointcut.is_transactional() {
                builder.transactional();
                continue;
            }
            for binding in pointcut.advices() {
                builder.push(binding);
            }
        }

        let chain = Arc::new(builder.build());
        tracing::trace!(
            "Built advice chain for {}: {} advice(s), transactional: {}",
            subject,
            chain.len(),
            chain.has_transaction
        );
        let cached = Arc::clone(self.chains.write().entry(subject).or_insert(chain));
        drop(state);
        cached
    }

    // ------------------------------------------------------------------
    // 代理
    // ------------------------------------------------------------------

    /// 为方法创建代理，代理在首次调用时解析并缓存通知链
    pub fn wrap(self: &Arc<Self>, instance: &str, method: &str, original: Method) -> ProxiedMethod {
        ProxiedMethod::new(Arc::clone(self), instance, method, original)
    }

    /// 把组件注册到实例注册表，供 [`AopFactory::install`] 扫描
    pub fn register_component(&self, name: &str, component: Arc<dyn Component>) -> AopResult<()> {
        self.registry.add_singleton(name, component)?;
        Ok(())
    }

    /// 启动时扫描实例注册表中的所有组件，为每个方法安装代理
    ///
    /// 返回安装的方法数量。
    pub fn install(self: &Arc<Self>, table: &ProxyTable) -> usize {
        let mut installed = 0;
        let mut intercepted = 0;

        for name in self.registry.instance_names() {
            let Some(component) = self
                .registry
                .get_instance(&name)
                .and_then(|instance| instance.downcast::<Arc<dyn Component>>().ok())
            else {
                continue;
            };
            let component: Arc<dyn Component> = Arc::clone(component.as_ref());

            for (method, original) in component.methods() {
                let proxy = self.wrap(&name, method, original);
                if !self.get_advices(&name, method).is_empty() {
                    intercepted += 1;
                    tracing::debug!("  ├─ Intercepting {}.{}", name, method);
                }
                table.insert(proxy);
                installed += 1;
            }
        }

        tracing::info!(
            "Installed {} method proxy(ies), {} intercepted",
            installed,
            intercepted
        );
        installed
    }

    // ------------------------------------------------------------------

    fn upsert(&self, id: &str, aspect: Option<&str>, expressions: Vec<MatchExpression>) -> AopResult<Pointcut> {
        let mut state = self.state.write();
        let pointcut = state.upsert(id, aspect, expressions);
        self.invalidate_locked();
        Ok(pointcut)
    }

    fn extend(&self, id: &str, expressions: Vec<MatchExpression>) -> AopResult<()> {
        let mut state = self.state.write();
        state.pointcut_mut(id)?.extend_expressions(expressions);
        self.invalidate_locked();
        Ok(())
    }

    fn require_transactions(&self) -> AopResult<&str> {
        match (&self.transactions, &self.transaction_pointcut) {
            (Some(_), Some(id)) => Ok(id),
            _ => Err(ConfigurationError::TransactionsNotEnabled),
        }
    }

    /// 调用方持有状态写锁
    fn invalidate_locked(&self) {
        self.chains.write().clear();
    }

    fn invalidate(&self) {
        let _state = self.state.write();
        self.invalidate_locked();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::AdviceType;
    use crate::joinpoint::JoinPoint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_core::DefaultInstanceRegistry;
    use tessera_tx::{MemoryDriver, TransactionDriver};

    struct NoopAspect(&'static str);

    #[async_trait]
    impl Aspect for NoopAspect {
        fn name(&self) -> &str {
            self.0
        }

        async fn advise(&self, _method: &str, _join_point: &mut JoinPoint) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn factory() -> AopFactory {
        AopFactory::new(Arc::new(DefaultInstanceRegistry::new()))
    }

    fn methods(bucket: &[AdviceBinding]) -> Vec<&str> {
        bucket.iter().map(|b| b.method.as_str()).collect()
    }

    #[test]
    fn test_register_pointcut_is_idempotent() {
        let factory = factory();
        let first = factory.register_pointcut("p", &["Svc.*"]).unwrap();
        assert_eq!(first.expressions().len(), 1);

        let again = factory.register_pointcut("p", &["Repo.*"]).unwrap();
        assert_eq!(again.id(), "p");
        assert_eq!(again.expressions().len(), 2);
        assert_eq!(factory.pointcut_ids(), vec!["p"]);
    }

    #[test]
    fn test_strict_registration_rejects_duplicates() {
        let factory = factory();
        factory.register_pointcut_strict("p", &["Svc.*"]).unwrap();
        assert!(matches!(
            factory.register_pointcut_strict("p", &[]),
            Err(ConfigurationError::DuplicatePointcut(id)) if id == "p"
        ));
    }

    #[test]
    fn test_unknown_pointcut() {
        let factory = factory();
        assert!(matches!(
            factory.add_expression("missing", &["Svc.*"]),
            Err(ConfigurationError::UnknownPointcut(_))
        ));
        assert!(matches!(
            factory.add_advice(AdviceBinding::before("missing", "A", "m")),
            Err(ConfigurationError::UnknownPointcut(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_malformed_expression_names_pointcut() {
        let factory = factory();
        let err = factory.register_pointcut("audit", &[""]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MalformedExpression { ref pointcut, .. } if pointcut == "audit"
        ));
        assert!(factory.pointcut("audit").is_none());
    }

    #[test]
    fn test_advices_follow_registration_order() {
        let factory = factory();
        factory.register_pointcut("second", &[]).unwrap();
        factory.register_pointcut("first", &["Svc.*"]).unwrap();
        // 表达式后加入，但切点注册顺序决定通知顺序
        factory.add_expression("second", &["Svc.save"]).unwrap();

        factory.add_advice(AdviceBinding::before("first", "A", "f1")).unwrap();
        factory.add_advice(AdviceBinding::before("second", "A", "s1")).unwrap();
        factory.add_advice(AdviceBinding::before("first", "A", "f2")).unwrap();
        factory.add_advice(AdviceBinding::around("first", "A", "r1")).unwrap();
        factory.add_advice(AdviceBinding::after("second", "A", "s2")).unwrap();
        factory.add_advice(AdviceBinding::around("second", "A", "r2")).unwrap();

        let chain = factory.get_advices("Svc", "save");
        assert_eq!(methods(&chain.before), vec!["r2", "r1", "s1", "f1", "f2"]);
        assert_eq!(methods(&chain.after), vec!["s2", "r2", "r1"]);

        let chain = factory.get_advices("Svc", "load");
        assert_eq!(methods(&chain.before), vec!["r1", "f1", "f2"]);
        assert_eq!(methods(&chain.after), vec!["r1"]);
    }

    #[test]
    fn test_chain_cache_is_cleared_on_mutation() {
        let factory = factory();
        factory.register_pointcut("p", &["Svc.*"]).unwrap();
        factory.add_advice(AdviceBinding::before("p", "A", "one")).unwrap();

        let first = factory.get_advices("Svc", "save");
        assert!(Arc::ptr_eq(&first, &factory.get_advices("Svc", "save")));

        factory.add_advice(AdviceBinding::before("p", "A", "two")).unwrap();
        let second = factory.get_advices("Svc", "save");
        assert_eq!(methods(&second.before), vec!["one", "two"]);
        assert_eq!(methods(&first.before), vec!["one"]);
    }

    #[test]
    fn test_unmatched_method_has_empty_chain() {
        let factory = factory();
        factory.register_pointcut("p", &["Svc.*"]).unwrap();
        factory.add_advice(AdviceBinding::before("p", "A", "one")).unwrap();
        assert!(factory.get_advices("Repo", "save").is_empty());
    }

    #[test]
    fn test_transaction_pointcut_only_sets_flag() {
        let driver = Arc::new(MemoryDriver::new()) as Arc<dyn TransactionDriver>;
        let manager = Arc::new(TransactionContextManager::new(driver));
        let factory = factory()
            .enable_transactions(manager, DEFAULT_TRANSACTION_POINTCUT)
            .unwrap();
        assert_eq!(factory.transaction_pointcut(), Some("transaction"));

        factory.mark_transactional(&["Svc.transfer*"]).unwrap();
        factory
            .add_advice(AdviceBinding::before("transaction", "A", "ignored"))
            .unwrap();

        let chain = factory.get_advices("Svc", "transferFunds");
        assert!(chain.has_transaction);
        assert!(chain.before.is_empty());
        assert!(!factory.get_advices("Svc", "balance").has_transaction);
    }

    #[test]
    fn test_transactions_not_enabled() {
        let factory = factory();
        assert!(matches!(
            factory.mark_transactional(&["Svc.*"]),
            Err(ConfigurationError::TransactionsNotEnabled)
        ));
        assert!(factory.transactions().is_none());
    }

    #[test]
    fn test_declarations_wait_for_aspect() {
        let factory = factory();
        factory.declare_advice(AdviceBinding::before("audit", "Audit", "record")).unwrap();
        factory.declare_pointcut("Audit", "audit", &["Svc.*"]).unwrap();
        assert!(factory.pointcut("audit").is_none());

        factory.add_aspect("Audit", Arc::new(NoopAspect("Audit"))).unwrap();

        let pointcut = factory.pointcut("audit").unwrap();
        assert_eq!(pointcut.aspect(), Some("Audit"));
        assert_eq!(pointcut.advices().len(), 1);
        assert!(factory.registry().has_class("Audit"));
        assert_eq!(factory.resolve_aspect("Audit").unwrap().name(), "Audit");

        // 切面添加后，新的声明立即生效
        factory.declare_advice(AdviceBinding::after("audit", "Audit", "flush")).unwrap();
        assert_eq!(methods(&factory.get_advices("Svc", "save").after), vec!["flush"]);
    }

    #[test]
    fn test_add_aspect_keeps_existing_instance() {
        let factory = factory();
        factory.add_aspect("Audit", Arc::new(NoopAspect("first"))).unwrap();
        factory.add_aspect("Audit", Arc::new(NoopAspect("second"))).unwrap();
        assert_eq!(factory.resolve_aspect("Audit").unwrap().name(), "first");
    }

    #[test]
    fn test_resolve_missing_aspect() {
        let factory = factory();
        factory.registry().add_singleton("NotAnAspect", 5u8).unwrap();
        assert!(matches!(
            factory.resolve_aspect("NotAnAspect"),
            Err(InvocationError::AspectNotFound(_))
        ));
        assert!(factory.resolve_aspect("Missing").is_err());
    }

    static DECLARED_CREATED: AtomicUsize = AtomicUsize::new(0);

    fn create_declared() -> Arc<dyn Aspect> {
        DECLARED_CREATED.fetch_add(1, Ordering::SeqCst);
        Arc::new(NoopAspect("DeclaredAspect"))
    }

    inventory::submit! {
        aspect::AspectRegistration::new("DeclaredAspect", create_declared)
    }
    inventory::submit! {
        aspect::PointcutDeclaration::new("DeclaredAspect", "declared", &["Declared.*"], 0)
    }
    inventory::submit! {
        aspect::AdviceDeclaration::new("DeclaredAspect", "declared", AdviceType::Before, "first", 0)
    }
    inventory::submit! {
        aspect::AdviceDeclaration::new("DeclaredAspect", "declared", AdviceType::Before, "second", 1)
    }

    #[test]
    fn test_auto_load_from_inventory() {
        let factory = factory();
        let loaded = factory.auto_load().unwrap();
        assert!(loaded >= 1);
        assert!(DECLARED_CREATED.load(Ordering::SeqCst) >= 1);

        let chain = factory.get_advices("Declared", "run");
        assert_eq!(methods(&chain.before), vec!["first", "second"]);
        assert!(factory.resolve_aspect("DeclaredAspect").is_ok());
    }
}

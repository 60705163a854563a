//! 实例注册表
//!
//! 拦截引擎把实例的构造当作黑盒：它只通过 [`InstanceRegistry`] 按名称查找实例、
//! 检查类是否已注册、注册新的实例。[`DefaultInstanceRegistry`] 是一个简单的参考实现。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::scope::Scope;

/// 注册表中的实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 创建实例的工厂函数
pub type InstanceFactory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// 实例注册表接口
pub trait InstanceRegistry: Send + Sync {
    /// 按名称获取实例，未注册时返回 `None`
    fn get_instance(&self, name: &str) -> Option<Instance>;

    /// 检查名称是否已注册
    fn has_class(&self, name: &str) -> bool;

    /// 注册实例工厂
    fn add_instance(&self, name: &str, factory: InstanceFactory, scope: Scope) -> CoreResult<()>;

    /// 按注册顺序返回所有名称
    fn instance_names(&self) -> Vec<String>;
}

/// 注册表的便捷扩展方法
pub trait InstanceRegistryExt: InstanceRegistry {
    /// 注册一个已构造好的单例
    fn add_singleton<T: Any + Send + Sync>(&self, name: &str, value: T) -> CoreResult<()> {
        let instance: Instance = Arc::new(value);
        self.add_instance(name, Arc::new(move || Arc::clone(&instance)), Scope::Singleton)
    }

    /// 按名称获取实例并向下转型
    fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> CoreResult<Arc<T>> {
        let instance = self
            .get_instance(name)
            .ok_or_else(|| CoreError::InstanceNotFound(name.to_string()))?;

        instance.downcast::<T>().map_err(|_| CoreError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }
}

impl<R: InstanceRegistry + ?Sized> InstanceRegistryExt for R {}

struct Definition {
    factory: InstanceFactory,
    scope: Scope,
}

/// 默认的实例注册表
#[derive(Default)]
pub struct DefaultInstanceRegistry {
    definitions: RwLock<HashMap<String, Definition>>,
    order: RwLock<Vec<String>>,
    singletons: RwLock<HashMap<String, Instance>>,
}

impl DefaultInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已注册的实例数量
    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }
}

impl InstanceRegistry for DefaultInstanceRegistry {
    fn get_instance(&self, name: &str) -> Option<Instance> {
        let (factory, scope) = {
            let definitions = self.definitions.read();
            let definition = definitions.get(name)?;
            (Arc::clone(&definition.factory), definition.scope)
        };

        match scope {
            Scope::Singleton => {
                if let Some(instance) = self.singletons.read().get(name) {
                    return Some(Arc::clone(instance));
                }

                // 工厂在锁外执行，并发创建时以先写入者为准
                let created = factory();
                let mut singletons = self.singletons.write();
                let instance = singletons.entry(name.to_string()).or_insert(created);
                tracing::trace!("Singleton instance '{}' cached", name);
                Some(Arc::clone(instance))
            }
            Scope::Prototype => {
                tracing::trace!("Creating prototype instance '{}'", name);
                Some(factory())
            }
        }
    }

    fn has_class(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    fn add_instance(&self, name: &str, factory: InstanceFactory, scope: Scope) -> CoreResult<()> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(name) {
            tracing::warn!("Instance '{}' already exists, registration failed", name);
            return Err(CoreError::InstanceAlreadyExists(name.to_string()));
        }

        definitions.insert(name.to_string(), Definition { factory, scope });
        self.order.write().push(name.to_string());

        tracing::debug!("Instance '{}' registered with scope {:?}", name, scope);
        Ok(())
    }

    fn instance_names(&self) -> Vec<String> {
        self.order.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct UserService {
        id: usize,
    }

    #[test]
    fn test_singleton_is_shared() {
        let registry = DefaultInstanceRegistry::new();
        registry.add_singleton("userService", UserService { id: 7 }).unwrap();

        let a = registry.get_typed::<UserService>("userService").unwrap();
        let b = registry.get_typed::<UserService>("userService").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id, 7);
    }

    #[test]
    fn test_singleton_factory_runs_once() {
        let registry = DefaultInstanceRegistry::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        registry
            .add_instance(
                "userService",
                Arc::new(move || {
                    let id = counter.fetch_add(1, Ordering::SeqCst);
                    Arc::new(UserService { id }) as Instance
                }),
                Scope::Singleton,
            )
            .unwrap();

        registry.get_instance("userService").unwrap();
        registry.get_instance("userService").unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prototype_creates_each_time() {
        let registry = DefaultInstanceRegistry::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        registry
            .add_instance(
                "request",
                Arc::new(move || {
                    let id = counter.fetch_add(1, Ordering::SeqCst);
                    Arc::new(UserService { id }) as Instance
                }),
                Scope::Prototype,
            )
            .unwrap();

        let a = registry.get_typed::<UserService>("request").unwrap();
        let b = registry.get_typed::<UserService>("request").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_and_missing() {
        let registry = DefaultInstanceRegistry::new();
        registry.add_singleton("a", 1u32).unwrap();

        assert!(matches!(
            registry.add_singleton("a", 2u32),
            Err(CoreError::InstanceAlreadyExists(name)) if name == "a"
        ));
        assert!(registry.has_class("a"));
        assert!(!registry.has_class("b"));
        assert!(registry.get_instance("b").is_none());
        assert!(matches!(
            registry.get_typed::<u32>("b"),
            Err(CoreError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = DefaultInstanceRegistry::new();
        registry.add_singleton("a", 1u32).unwrap();

        assert!(matches!(
            registry.get_typed::<String>("a"),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_names_keep_registration_order() {
        let registry = DefaultInstanceRegistry::new();
        registry.add_singleton("zeta", 1u8).unwrap();
        registry.add_singleton("alpha", 2u8).unwrap();

        assert_eq!(registry.instance_names(), vec!["zeta", "alpha"]);
        assert_eq!(registry.len(), 2);
    }
}

/// 实例的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 单例模式 - 首次获取时创建，之后复用
    #[default]
    Singleton,

    /// 原型模式 - 每次获取都创建新实例
    Prototype,
}

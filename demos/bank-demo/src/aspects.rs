//! 切面模块

pub mod audit_aspect;

pub use audit_aspect::AuditAspect;

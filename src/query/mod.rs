// 查询模型模块
//
// ┌─────────────────────────────────────────────┐
// │  NL 解析组件 (外部)                          │
// │          │ InterpretedQuery                  │
// │          ▼                                   │
// │  types.rs        查询结构 / 复杂度 / 意图      │
// │  fingerprint.rs  语义指纹 (缓存键)            │
// └─────────────────────────────────────────────┘

pub mod fingerprint;
pub mod types;

pub use fingerprint::{fingerprint, fingerprint_text};
pub use types::*;

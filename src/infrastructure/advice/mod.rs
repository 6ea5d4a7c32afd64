//! 装饰器与通知
//!
//! - [`DecoratorDef`]：在服务实例化后包装其委托对象
//! - [`AdvisedMethod`]：单个方法的通知链
//! - [`PipelineBuilder`]：过滤器到终端处理器的桥接管道

mod decorator;
mod method;
mod pipeline;

pub use decorator::DecoratorDef;
pub use method::{AdvisedMethod, AdvisedMethodBuilder, MethodAdvice, Proceed};
pub use pipeline::{build_pipeline, Filter, Handler, PipelineBuilder};

//! 过滤器管道
//!
//! 每个过滤器只看到"下一环"，管道把过滤器逐个桥接到终端处理器上，
//! 过滤器的实现与链上有多少其他过滤器无关。

use crate::errors::Result;
use crate::infrastructure::ordering::{Constraint, Orderer};
use std::sync::Arc;

/// 终端处理器，也是整条管道对外的形态
pub trait Handler<Req, Resp>: Send + Sync {
    fn handle(&self, request: Req) -> anyhow::Result<Resp>;
}

impl<Req, Resp, F> Handler<Req, Resp> for F
where
    F: Fn(Req) -> anyhow::Result<Resp> + Send + Sync,
{
    fn handle(&self, request: Req) -> anyhow::Result<Resp> {
        self(request)
    }
}

/// 过滤器：与处理器形状相同，多一个 `next` 参数
pub trait Filter<Req, Resp>: Send + Sync {
    fn filter(&self, request: Req, next: &dyn Handler<Req, Resp>) -> anyhow::Result<Resp>;
}

impl<Req, Resp, F> Filter<Req, Resp> for F
where
    F: Fn(Req, &dyn Handler<Req, Resp>) -> anyhow::Result<Resp> + Send + Sync,
{
    fn filter(&self, request: Req, next: &dyn Handler<Req, Resp>) -> anyhow::Result<Resp> {
        self(request, next)
    }
}

struct Bridge<Req, Resp> {
    filter: Arc<dyn Filter<Req, Resp>>,
    next: Arc<dyn Handler<Req, Resp>>,
}

impl<Req, Resp> Handler<Req, Resp> for Bridge<Req, Resp> {
    fn handle(&self, request: Req) -> anyhow::Result<Resp> {
        self.filter.filter(request, self.next.as_ref())
    }
}

/// 把已排序的过滤器（由外到内）桥接到终端处理器
pub fn build_pipeline<Req, Resp, I>(filters: I, terminator: Arc<dyn Handler<Req, Resp>>) -> Arc<dyn Handler<Req, Resp>>
where
    Req: 'static,
    Resp: 'static,
    I: IntoIterator<Item = Arc<dyn Filter<Req, Resp>>>,
    I::IntoIter: DoubleEndedIterator,
{
    filters.into_iter().rev().fold(terminator, |next, filter| {
        Arc::new(Bridge { filter, next }) as Arc<dyn Handler<Req, Resp>>
    })
}

/// 带排序约束的管道构建器
pub struct PipelineBuilder<Req, Resp> {
    orderer: Orderer<Arc<dyn Filter<Req, Resp>>>,
}

impl<Req: 'static, Resp: 'static> PipelineBuilder<Req, Resp> {
    pub fn new(name: &str) -> Self {
        Self {
            orderer: Orderer::new(format!("pipeline '{}'", name)),
        }
    }

    pub fn add_filter(
        &mut self,
        id: &str,
        filter: impl Filter<Req, Resp> + 'static,
        constraints: &[&str],
    ) -> Result<&mut Self> {
        self.add_shared_filter(id, Arc::new(filter), constraints)
    }

    pub fn add_shared_filter(
        &mut self,
        id: &str,
        filter: Arc<dyn Filter<Req, Resp>>,
        constraints: &[&str],
    ) -> Result<&mut Self> {
        self.orderer.add(id, filter, Constraint::parse_all(constraints)?)?;
        Ok(self)
    }

    pub fn filter_ids(&self) -> Vec<String> {
        self.orderer.order_ids()
    }

    pub fn build(self, terminator: impl Handler<Req, Resp> + 'static) -> Arc<dyn Handler<Req, Resp>> {
        build_pipeline(self.orderer.order(), Arc::new(terminator))
    }
}

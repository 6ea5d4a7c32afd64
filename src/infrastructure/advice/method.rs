//! 方法通知链
//!
//! 每个通知可以在调用下一环之前/之后执行逻辑，也可以替换参数、返回值或错误。
//! 链在构建后不可变，所有调用方共享。

use crate::errors::Result;
use crate::infrastructure::ordering::{Constraint, Orderer};
use std::fmt;
use std::sync::Arc;

/// 下一环调用
pub type Proceed<'a, A, R> = &'a dyn Fn(A) -> anyhow::Result<R>;

/// 方法通知
pub trait MethodAdvice<A, R>: Send + Sync {
    fn advise(&self, method: &str, args: A, proceed: Proceed<'_, A, R>) -> anyhow::Result<R>;
}

impl<A, R, F> MethodAdvice<A, R> for F
where
    F: Fn(&str, A, Proceed<'_, A, R>) -> anyhow::Result<R> + Send + Sync,
{
    fn advise(&self, method: &str, args: A, proceed: Proceed<'_, A, R>) -> anyhow::Result<R> {
        self(method, args, proceed)
    }
}

type Terminator<A, R> = Arc<dyn Fn(A) -> anyhow::Result<R> + Send + Sync>;

enum Link<A, R> {
    Advice {
        advice_id: String,
        advice: Arc<dyn MethodAdvice<A, R>>,
        next: Box<Link<A, R>>,
    },
    Terminator(Terminator<A, R>),
}

impl<A, R> Link<A, R> {
    fn invoke(&self, method: &str, args: A) -> anyhow::Result<R> {
        match self {
            Link::Advice { advice, next, .. } => {
                advice.advise(method, args, &|args| next.invoke(method, args))
            }
            Link::Terminator(terminator) => terminator(args),
        }
    }
}

/// 已装配通知的方法
pub struct AdvisedMethod<A, R> {
    method: String,
    head: Arc<Link<A, R>>,
}

impl<A, R> AdvisedMethod<A, R> {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn invoke(&self, args: A) -> anyhow::Result<R> {
        self.head.invoke(&self.method, args)
    }

    /// 通知 id，由外到内
    pub fn advice_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut link = &*self.head;
        while let Link::Advice { advice_id, next, .. } = link {
            ids.push(advice_id.as_str());
            link = next;
        }
        ids
    }
}

impl<A, R> Clone for AdvisedMethod<A, R> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            head: self.head.clone(),
        }
    }
}

impl<A, R> fmt::Debug for AdvisedMethod<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedMethod")
            .field("method", &self.method)
            .field("advice", &self.advice_ids())
            .finish()
    }
}

/// 按排序约束装配通知链
pub struct AdvisedMethodBuilder<A, R> {
    method: String,
    orderer: Orderer<Arc<dyn MethodAdvice<A, R>>>,
}

impl<A: 'static, R: 'static> AdvisedMethodBuilder<A, R> {
    pub fn new(method: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            orderer: Orderer::new(format!("advice of method '{}'", method)),
            method,
        }
    }

    pub fn add_advice(
        &mut self,
        id: &str,
        advice: impl MethodAdvice<A, R> + 'static,
        constraints: &[&str],
    ) -> Result<&mut Self> {
        let constraints = Constraint::parse_all(constraints)?;
        self.orderer.add(id, Arc::new(advice), constraints)?;
        Ok(self)
    }

    pub fn add_shared_advice(
        &mut self,
        id: &str,
        advice: Arc<dyn MethodAdvice<A, R>>,
        constraints: &[&str],
    ) -> Result<&mut Self> {
        let constraints = Constraint::parse_all(constraints)?;
        self.orderer.add(id, advice, constraints)?;
        Ok(self)
    }

    /// 装配链，`terminator` 为真正的方法调用
    pub fn build<F>(self, terminator: F) -> AdvisedMethod<A, R>
    where
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let mut head = Link::Terminator(Arc::new(terminator));
        for orderable in self.orderer.order_orderables().into_iter().rev() {
            if let Some(advice) = orderable.value {
                head = Link::Advice {
                    advice_id: orderable.id,
                    advice,
                    next: Box::new(head),
                };
            }
        }

        AdvisedMethod {
            method: self.method,
            head: Arc::new(head),
        }
    }
}

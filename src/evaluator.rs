//! Recursive evaluation of target expressions against a [`Store`].

use crate::error::{Result, StrataError};
use crate::finder::Store;
use crate::functions::{Args, FunctionContext, FunctionRegistry};
use crate::node::Node;
use crate::parser::{self, Expr};
use crate::series::TimeSeries;
use crate::telemetry::{strata_metrics, StrataEvent};

use rayon::prelude::*;

use std::collections::HashMap;

/// The time window and request-scoped state one evaluation runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub start_time: i64,
    pub end_time: i64,
    /// Only consult local backends.
    pub local_only: bool,
    /// Free-form state carried through nested evaluations.
    pub extra: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            local_only: false,
            extra: HashMap::new(),
        }
    }

    /// A copy with a different window.
    pub fn with_window(&self, start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            ..self.clone()
        }
    }
}

/// Result of evaluating an expression or argument.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    SeriesList(Vec<TimeSeries>),
    Number(f64),
    Str(String),
    Bool(bool),
}

impl EvalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::SeriesList(_) => "series list",
            EvalValue::Number(_) => "number",
            EvalValue::Str(_) => "string",
            EvalValue::Bool(_) => "boolean",
        }
    }
}

/// Evaluates expressions using a store for path lookups and an owned function table.
#[derive(Debug, Clone)]
pub struct Evaluator {
    store: Store,
    registry: FunctionRegistry,
}

impl Evaluator {
    pub fn new(store: Store, registry: FunctionRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Parses and evaluates `target`, which must produce a series list.
    ///
    /// Unknown function names are rejected before anything is fetched.
    pub fn evaluate_target(&self, ctx: &RequestContext, target: &str) -> Result<Vec<TimeSeries>> {
        let expr = parser::parse(target)?;
        self.validate(&expr)?;
        strata_metrics::record_evaluation();
        match self.evaluate_expr(ctx, &expr)? {
            EvalValue::SeriesList(list) => Ok(list),
            other => Err(StrataError::ArgumentShape(format!(
                "target '{}' evaluates to a {}, not a series list",
                target,
                other.type_name()
            ))),
        }
    }

    pub fn validate(&self, expr: &Expr) -> Result<()> {
        for name in expr.function_names() {
            if !self.registry.contains(name) {
                return Err(StrataError::InvalidFunctionName(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn evaluate_expr(&self, ctx: &RequestContext, expr: &Expr) -> Result<EvalValue> {
        match expr {
            Expr::Path(path) => Ok(EvalValue::SeriesList(self.fetch_path(ctx, path)?)),
            Expr::Number(n) => Ok(EvalValue::Number(*n)),
            Expr::Str(s) => Ok(EvalValue::Str(s.clone())),
            Expr::Bool(b) => Ok(EvalValue::Bool(*b)),
            Expr::Call(call) => {
                let func = self
                    .registry
                    .get(&call.name)
                    .ok_or_else(|| StrataError::InvalidFunctionName(call.name.clone()))?;
                let positional = call
                    .args
                    .iter()
                    .map(|arg| self.evaluate_expr(ctx, arg))
                    .collect::<Result<Vec<_>>>()?;
                let keyword = call
                    .kwargs
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.evaluate_expr(ctx, v)?)))
                    .collect::<Result<Vec<_>>>()?;
                let fctx = FunctionContext {
                    request: ctx,
                    evaluator: self,
                };
                let result = func(&fctx, &Args::new(call.name.clone(), positional, keyword))?;
                if let EvalValue::SeriesList(list) = &result {
                    self.store.listener().on_event(StrataEvent::FunctionEvaluated {
                        name: call.name.clone(),
                        series: list.len(),
                    });
                }
                Ok(result)
            }
        }
    }

    /// Resolves a path expression and fetches every leaf over the context window.
    ///
    /// Leaves with no data in the window are omitted; the result is sorted by name.
    pub fn fetch_path(&self, ctx: &RequestContext, path: &str) -> Result<Vec<TimeSeries>> {
        let nodes = self
            .store
            .find(path, Some(ctx.start_time), Some(ctx.end_time))?;
        let leaves: Vec<_> = nodes.iter().filter_map(Node::as_leaf).collect();
        let fetched = leaves
            .par_iter()
            .map(|leaf| {
                Ok(leaf
                    .fetch(ctx.start_time, ctx.end_time)?
                    .map(|r| TimeSeries::from_fetch(leaf.path(), r).with_path_expression(path)))
            })
            .collect::<Result<Vec<Option<TimeSeries>>>>()?;
        Ok(fetched.into_iter().flatten().collect())
    }
}

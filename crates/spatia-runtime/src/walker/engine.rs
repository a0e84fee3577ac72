//! Walker traversal engine.
//!
//! A run moves one walker through the graph: entry abilities fire at the
//! start node, then every dequeue fires the exit abilities of the node being
//! left and the entry abilities of the next one. The frontier is FIFO and is
//! fed by `visit`. `ignore` is sticky for the rest of the run.
//!
//! Faults (ability errors, panics, guard expiry) stop the run as
//! `DISENGAGED` and are recorded in the context's reports. Storage errors are
//! returned to the caller.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use spatia_core::anchor::{Payload, WalkerArchitype, WalkerStatus};
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::{EntityKind, RefId};
use spatia_core::value::{Record, Value};

use super::ability::{AbilityTable, Event};
use crate::context::ExecutionContext;
use crate::filter::{EdgeFilter, EdgeSpec};

/// Result of one walker run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub walker: RefId,
    pub status: WalkerStatus,
    /// Nodes entered, in order.
    pub visited: Vec<RefId>,
    pub returns: Vec<Value>,
    /// Message of the fault that aborted the run, if any.
    pub fault: Option<String>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == WalkerStatus::Complete
    }
}

/// Handle passed to abilities while the walker stands on a node.
pub struct Step<'a> {
    ctx: &'a mut ExecutionContext,
    walker: RefId,
    state: &'a mut WalkerArchitype,
    returns: &'a mut Vec<Value>,
    here: RefId,
    event: Event,
}

impl<'a> Step<'a> {
    /// Node the walker stands on.
    pub fn here(&self) -> RefId {
        self.here
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn walker_id(&self) -> RefId {
        self.walker
    }

    pub fn walker(&self) -> &Payload {
        &self.state.payload
    }

    pub fn walker_mut(&mut self) -> &mut Payload {
        &mut self.state.payload
    }

    pub fn frontier(&self) -> &VecDeque<RefId> {
        &self.state.frontier
    }

    pub fn path(&self) -> &[RefId] {
        &self.state.path
    }

    pub fn context(&mut self) -> &mut ExecutionContext {
        &mut *self.ctx
    }

    /// Queue destinations at the back of the frontier.
    ///
    /// Duplicates within one call collapse to the first occurrence; ignored
    /// ids and non-node references are skipped. Returns how many were queued.
    pub fn visit<I>(&mut self, targets: I) -> usize
    where
        I: IntoIterator<Item = RefId>,
    {
        if self.state.disengaged {
            return 0;
        }
        let mut seen = HashSet::new();
        let mut queued = 0;
        for id in targets {
            if id.kind() != EntityKind::Node
                || self.state.ignores.contains(&id)
                || !seen.insert(id)
            {
                continue;
            }
            self.state.frontier.push_back(id);
            queued += 1;
        }
        trace!(walker = %self.walker, queued, pending = self.state.frontier.len(), "Visit");
        queued
    }

    /// Queue the far endpoints of the visible edges selected by `filter`.
    pub fn visit_edges(&mut self, filter: &EdgeFilter) -> Result<usize> {
        let targets = self.ctx.neighbors(self.here, filter)?;
        Ok(self.visit(targets))
    }

    /// Drop destinations from the frontier and never visit them in this run.
    pub fn ignore<I>(&mut self, targets: I)
    where
        I: IntoIterator<Item = RefId>,
    {
        for id in targets {
            if !self.state.ignores.contains(&id) {
                self.state.ignores.push(id);
            }
        }
        let ignores = &self.state.ignores;
        self.state.frontier.retain(|id| !ignores.contains(id));
    }

    /// Stop after the current node's exit abilities.
    pub fn disengage(&mut self) {
        if !self.state.disengaged {
            debug!(walker = %self.walker, at = %self.here, "Disengage requested");
            self.state.disengaged = true;
        }
    }

    pub fn is_disengaged(&self) -> bool {
        self.state.disengaged
    }

    pub fn report(&mut self, value: impl Into<Value>) {
        self.ctx.report(value);
    }

    /// Append to the run's return values.
    pub fn ret(&mut self, value: impl Into<Value>) {
        self.returns.push(value.into());
    }

    pub fn edges(&mut self, filter: &EdgeFilter) -> Result<Vec<RefId>> {
        self.ctx.edges(self.here, filter)
    }

    pub fn neighbors(&mut self, filter: &EdgeFilter) -> Result<Vec<RefId>> {
        self.ctx.neighbors(self.here, filter)
    }

    /// Payload of the current node if readable.
    pub fn node(&mut self) -> Result<Option<Payload>> {
        self.ctx.payload(&self.here)
    }

    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) -> Result<bool> {
        self.ctx.set_field(&self.here, key, value)
    }

    pub fn spawn_node(&mut self, payload: Payload) -> Result<RefId> {
        self.ctx.spawn_node(payload)
    }

    /// Edge from the current node to `target`.
    pub fn connect(&mut self, target: RefId, spec: EdgeSpec) -> Result<Option<RefId>> {
        self.ctx.connect(self.here, target, spec)
    }

    pub fn disconnect(&mut self, target: RefId) -> Result<usize> {
        self.ctx.disconnect(self.here, target)
    }
}

struct Runner<'a> {
    ctx: &'a mut ExecutionContext,
    table: &'a AbilityTable,
    walker: RefId,
    state: WalkerArchitype,
    returns: Vec<Value>,
    fault: Option<String>,
    started: Instant,
    steps: usize,
}

impl<'a> Runner<'a> {
    fn drive(&mut self, start: RefId) -> Result<()> {
        let mut current = start;
        self.enter(current)?;

        loop {
            if self.fault.is_some() {
                break;
            }
            self.fire(Event::Exit, current)?;
            if self.fault.is_some() || self.state.disengaged {
                break;
            }

            let Some(next) = self.dequeue()? else {
                self.state.status = WalkerStatus::Complete;
                break;
            };
            if let Some(err) = self.expired().or_else(|| self.over_budget()) {
                self.abort(current, err.to_string());
                break;
            }
            self.steps += 1;
            current = next;
            self.enter(current)?;
        }

        if self.state.status != WalkerStatus::Complete {
            self.state.status = WalkerStatus::Disengaged;
            self.state.disengaged = true;
            self.state.frontier.clear();
        }
        Ok(())
    }

    fn enter(&mut self, node: RefId) -> Result<()> {
        self.state.position = Some(node);
        self.state.path.push(node);
        trace!(walker = %self.walker, node = %node, "Entered");
        self.fire(Event::Entry, node)
    }

    /// Next destination that still exists and is a node.
    fn dequeue(&mut self) -> Result<Option<RefId>> {
        while let Some(id) = self.state.frontier.pop_front() {
            if self.state.ignores.contains(&id) {
                continue;
            }
            if self.ctx.materialize(&id)?
                && self
                    .ctx
                    .cached(&id)
                    .map(|a| a.architype.is_node())
                    .unwrap_or(false)
            {
                return Ok(Some(id));
            }
            debug!(walker = %self.walker, id = %id, "Skipping missing destination");
        }
        Ok(None)
    }

    fn expired(&self) -> Option<SpatiaError> {
        let limit = self.ctx.config().walker_timeout_ms;
        if limit > 0 && self.started.elapsed() > Duration::from_millis(limit) {
            return Some(SpatiaError::WalkerTimeout(limit));
        }
        None
    }

    fn over_budget(&self) -> Option<SpatiaError> {
        let max = self.ctx.config().max_steps;
        (self.steps >= max).then_some(SpatiaError::StepBudgetExceeded(max))
    }

    /// Dispatch `event` abilities for `node` in declaration order.
    ///
    /// A disengage during entry skips the remaining entry abilities; exit
    /// abilities always run to the end unless one faults.
    fn fire(&mut self, event: Event, node: RefId) -> Result<()> {
        let abilities = match self.ctx.cached(&node) {
            Some(anchor) => self.table.matching(event, &anchor.architype),
            None => return Ok(()),
        };

        for ability in abilities {
            if self.fault.is_some() || (event == Event::Entry && self.state.disengaged) {
                break;
            }
            if let Some(err) = self.expired() {
                self.abort(node, err.to_string());
                break;
            }

            trace!(walker = %self.walker, node = %node, %event, "Dispatch");
            let mut step = Step {
                ctx: &mut *self.ctx,
                walker: self.walker,
                state: &mut self.state,
                returns: &mut self.returns,
                here: node,
                event,
            };
            match catch_unwind(AssertUnwindSafe(|| (*ability)(&mut step))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_storage() => return Err(e),
                Ok(Err(e)) => {
                    self.abort(node, e.to_string());
                    break;
                }
                Err(panic) => {
                    self.abort(node, panic_message(panic));
                    break;
                }
            }
        }
        Ok(())
    }

    fn abort(&mut self, node: RefId, message: String) {
        warn!(walker = %self.walker, node = %node, error = %message, "Walker fault");
        self.state.disengaged = true;
        self.ctx.report(
            Record::new("WalkerFault")
                .field("walker", self.walker.to_string())
                .field("node", node.to_string())
                .field("error", message.clone()),
        );
        self.fault = Some(message);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

/// Run a spawned walker from `start` with the given abilities.
pub fn run(
    ctx: &mut ExecutionContext,
    walker: RefId,
    start: RefId,
    table: &AbilityTable,
) -> Result<RunOutcome> {
    ctx.ensure_open()?;
    let mut state = {
        let anchor = ctx.anchor(&walker)?;
        match anchor.architype.as_walker() {
            Some(w) => w.clone(),
            None => {
                return Err(SpatiaError::KindMismatch {
                    id: walker.to_string(),
                    expected: EntityKind::Walker.to_string(),
                    actual: anchor.architype.kind().to_string(),
                })
            }
        }
    };
    if state.status != WalkerStatus::Spawned {
        return Err(SpatiaError::WalkerFinished(walker.to_string()));
    }
    let start_kind = ctx.anchor(&start)?.architype.kind();
    if start_kind != EntityKind::Node {
        return Err(SpatiaError::KindMismatch {
            id: start.to_string(),
            expected: EntityKind::Node.to_string(),
            actual: start_kind.to_string(),
        });
    }

    state.status = WalkerStatus::Running;
    debug!(walker = %walker, start = %start, "Walker started");

    let mut runner = Runner {
        ctx: &mut *ctx,
        table,
        walker,
        state,
        returns: Vec::new(),
        fault: None,
        started: Instant::now(),
        steps: 0,
    };
    let result = runner.drive(start);
    let Runner {
        mut state,
        returns,
        fault,
        ..
    } = runner;

    if result.is_err() {
        state.status = WalkerStatus::Disengaged;
        state.disengaged = true;
        state.frontier.clear();
    }
    let status = state.status;
    let visited = state.path.clone();
    if let Some(slot) = ctx
        .cached_mut(&walker)
        .and_then(|a| a.architype.as_walker_mut())
    {
        *slot = state;
    }

    if let Err(e) = result {
        warn!(walker = %walker, error = %e, "Walker run failed");
        return Err(ctx.observe(e));
    }
    debug!(walker = %walker, %status, steps = visited.len(), "Walker finished");
    Ok(RunOutcome {
        walker,
        status,
        visited,
        returns,
        fault,
    })
}

impl ExecutionContext {
    /// Spawn a walker and run it from the context's entry node.
    pub fn run_walker(&mut self, payload: Payload, table: &AbilityTable) -> Result<RunOutcome> {
        let walker = self.spawn_walker(payload)?;
        let entry = self.entry_id();
        run(self, walker, entry, table)
    }
}

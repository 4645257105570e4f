use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::{Storage, TensorHandle};

/// Opaque compute unit; the context only sequences it.
pub trait Operator {
    fn name(&self) -> &str;

    fn execute(
        &self,
        inputs: &[&TensorHandle],
        outputs: &[&TensorHandle],
    ) -> Result<(), RuntimeError>;
}

/// Operator that does nothing; used when only the bookkeeping is of interest.
#[derive(Debug, Clone)]
pub struct NoopOperator {
    name: String,
}

impl NoopOperator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Operator for NoopOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _: &[&TensorHandle], _: &[&TensorHandle]) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("tensor '{name}' is already registered")]
    DuplicateRegistration { name: String },
    #[error("tensor '{name}' overlaps the storage of live tensor '{other}'")]
    AddressConflict { name: String, other: String },
    #[error("operator '{op}' references unregistered tensor '{name}'")]
    UnknownTensor { op: String, name: String },
    #[error("tensor '{name}' is not registered")]
    NotRegistered { name: String },
    #[error("refcount of tensor '{name}' dropped below zero")]
    RefcountUnderflow { name: String },
    #[error("tensors still held at program exit: {}", names.join(", "))]
    Leaked { names: Vec<String> },
    #[error("context has already terminated")]
    Terminated,
    #[error("operator '{op}' failed: {message}")]
    Operator { op: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Empty,
    Populated,
    Flushed,
    Terminated,
}

/// One observable step of the context, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Registered { name: String, refcount: usize },
    Enqueued { op: String },
    Executed { op: String },
    Released { name: String },
    Flushed { executed: usize },
}

struct Entry {
    handle: TensorHandle,
    refcount: usize,
}

struct Pending {
    op: Arc<dyn Operator>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

/// Refcounted tensor table plus a FIFO of pending operator evaluations.
pub struct EvalContext {
    tensors: HashMap<String, Entry>,
    queue: VecDeque<Pending>,
    state: ContextState,
    events: Vec<Event>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("state", &self.state)
            .field("live", &self.live())
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self {
            tensors: HashMap::new(),
            queue: VecDeque::new(),
            state: ContextState::Empty,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn refcount(&self, name: &str) -> Option<usize> {
        self.tensors.get(name).map(|entry| entry.refcount)
    }

    /// Names of currently registered tensors, sorted.
    pub fn live(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn register(
        &mut self,
        name: &str,
        storage: Storage,
        refcount: usize,
    ) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        if self.tensors.contains_key(name) {
            return Err(RuntimeError::DuplicateRegistration {
                name: name.to_string(),
            });
        }
        let conflict = self
            .tensors
            .values()
            .filter(|entry| entry.handle.storage.overlaps(&storage))
            .map(|entry| entry.handle.name.as_str())
            .min();
        if let Some(other) = conflict {
            return Err(RuntimeError::AddressConflict {
                name: name.to_string(),
                other: other.to_string(),
            });
        }

        self.tensors.insert(
            name.to_string(),
            Entry {
                handle: TensorHandle {
                    name: name.to_string(),
                    storage,
                },
                refcount,
            },
        );
        self.events.push(Event::Registered {
            name: name.to_string(),
            refcount,
        });
        self.state = ContextState::Populated;
        Ok(())
    }

    pub fn enqueue(
        &mut self,
        op: Arc<dyn Operator>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        if let Some(missing) = inputs
            .iter()
            .chain(outputs.iter())
            .find(|name| !self.tensors.contains_key(**name))
        {
            return Err(RuntimeError::UnknownTensor {
                op: op.name().to_string(),
                name: missing.to_string(),
            });
        }
        self.events.push(Event::Enqueued {
            op: op.name().to_string(),
        });
        self.queue.push_back(Pending {
            op,
            inputs: inputs.iter().map(|name| name.to_string()).collect(),
            outputs: outputs.iter().map(|name| name.to_string()).collect(),
        });
        self.state = ContextState::Populated;
        Ok(())
    }

    /// Executes pending operators in enqueue order, releasing tensors as refcounts hit zero.
    pub fn flush(&mut self) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        let mut executed = 0;
        while let Some(pending) = self.queue.pop_front() {
            let inputs = self.resolve(&pending.inputs)?;
            let outputs = self.resolve(&pending.outputs)?;
            {
                let inputs: Vec<&TensorHandle> = inputs.iter().collect();
                let outputs: Vec<&TensorHandle> = outputs.iter().collect();
                pending.op.execute(&inputs, &outputs)?;
            }
            self.events.push(Event::Executed {
                op: pending.op.name().to_string(),
            });
            executed += 1;

            let mut seen: Vec<&str> = Vec::with_capacity(pending.inputs.len());
            for name in &pending.inputs {
                if seen.contains(&name.as_str()) {
                    continue;
                }
                seen.push(name);
                self.decrement(name)?;
            }
            for name in &pending.outputs {
                if self.refcount(name) == Some(0) {
                    self.release(name);
                }
            }
        }
        self.events.push(Event::Flushed { executed });
        self.state = ContextState::Flushed;
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&TensorHandle, RuntimeError> {
        self.tensors
            .get(name)
            .map(|entry| &entry.handle)
            .ok_or_else(|| RuntimeError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// Flushes, drops the external observer's hold on each graph output and checks that
    /// nothing else is still registered.
    pub fn finish(&mut self, outputs: &[&str]) -> Result<(), RuntimeError> {
        self.flush()?;
        for name in outputs {
            self.decrement(name)?;
        }
        self.state = ContextState::Terminated;
        if self.tensors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Leaked { names: self.live() })
        }
    }

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if self.state == ContextState::Terminated {
            Err(RuntimeError::Terminated)
        } else {
            Ok(())
        }
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<TensorHandle>, RuntimeError> {
        names
            .iter()
            .map(|name| self.lookup(name).cloned())
            .collect()
    }

    fn decrement(&mut self, name: &str) -> Result<(), RuntimeError> {
        let entry = self
            .tensors
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotRegistered {
                name: name.to_string(),
            })?;
        entry.refcount = entry
            .refcount
            .checked_sub(1)
            .ok_or_else(|| RuntimeError::RefcountUnderflow {
                name: name.to_string(),
            })?;
        if entry.refcount == 0 {
            self.release(name);
        }
        Ok(())
    }

    fn release(&mut self, name: &str) {
        if self.tensors.remove(name).is_some() {
            tracing::trace!(tensor = name, "released");
            self.events.push(Event::Released {
                name: name.to_string(),
            });
        }
    }
}

use std::collections::BTreeSet;

use annotator_core::{AnnotatorError, NodeId, PassId, Result};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::classifier::Region;
use crate::context::PassContext;

/// One unit of annotation work.
///
/// `run` is called once per region root in a batch and must be idempotent:
/// running it twice over an unchanged subtree changes nothing.
pub trait AnnotationPass: Send {
    /// Stable name, used for ordering constraints, logging and marker mirroring.
    fn name(&self) -> &str;

    fn region(&self) -> Region;

    /// Names of passes that must run before this one within a batch.
    fn after(&self) -> &[&str] {
        &[]
    }

    fn run(&mut self, ctx: &mut PassContext<'_>, root: NodeId) -> Result<()>;

    /// Called instead of `run` when the region has no roots in this batch.
    fn region_absent(&mut self, _ctx: &mut PassContext<'_>) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct RegisteredPass {
    pub(crate) name: String,
    pub(crate) region: Region,
    pub(crate) pass: Box<dyn AnnotationPass>,
}

#[derive(Default)]
pub struct PassRegistry {
    passes: Vec<RegisteredPass>,
    by_name: FxHashMap<String, PassId>,
    order: Vec<PassId>,
    sealed: bool,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pass: Box<dyn AnnotationPass>) -> Result<PassId> {
        let name = pass.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(AnnotatorError::PassOrder(format!(
                "pass `{name}` registered twice"
            )));
        }
        let index = u16::try_from(self.passes.len())
            .map_err(|_| AnnotatorError::PassOrder("too many passes".to_string()))?;
        let id = PassId(index);

        let region = pass.region();
        debug!(pass = %name, region = %region.name, "registered annotation pass");
        self.by_name.insert(name.clone(), id);
        self.passes.push(RegisteredPass { name, region, pass });
        self.sealed = false;
        Ok(id)
    }

    pub fn register_all(
        &mut self,
        passes: impl IntoIterator<Item = Box<dyn AnnotationPass>>,
    ) -> Result<Vec<PassId>> {
        passes.into_iter().map(|pass| self.register(pass)).collect()
    }

    /// Fix the execution order: every `after` constraint is honoured and
    /// unconstrained passes keep registration order.
    pub fn seal(&mut self) -> Result<()> {
        let count = self.passes.len();
        let mut indegree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, entry) in self.passes.iter().enumerate() {
            for dependency in entry.pass.after() {
                let Some(id) = self.by_name.get(*dependency) else {
                    return Err(AnnotatorError::PassOrder(format!(
                        "pass `{}` runs after unknown pass `{}`",
                        entry.name, dependency
                    )));
                };
                dependents[id.index()].push(index);
                indegree[index] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            order.push(PassId(index as u16));
            for dependent in &dependents[index] {
                indegree[*dependent] -= 1;
                if indegree[*dependent] == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        if order.len() != count {
            let stuck: Vec<&str> = (0..count)
                .filter(|i| indegree[*i] > 0)
                .map(|i| self.passes[i].name.as_str())
                .collect();
            return Err(AnnotatorError::PassOrder(format!(
                "ordering cycle among passes: {}",
                stuck.join(", ")
            )));
        }

        self.order = order;
        self.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Execution order; empty until sealed.
    pub fn order(&self) -> &[PassId] {
        if self.sealed {
            &self.order
        } else {
            &[]
        }
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<PassId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: PassId) -> Option<&str> {
        self.passes.get(id.index()).map(|entry| entry.name.as_str())
    }

    pub fn region(&self, id: PassId) -> Option<&Region> {
        self.passes.get(id.index()).map(|entry| &entry.region)
    }

    pub fn ids(&self) -> impl Iterator<Item = PassId> + '_ {
        (0..self.passes.len()).map(|index| PassId(index as u16))
    }

    pub(crate) fn get_mut(&mut self, id: PassId) -> Option<&mut RegisteredPass> {
        self.passes.get_mut(id.index())
    }
}

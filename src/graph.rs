//! In-memory lineage DAG. Nodes live in an arena and refer to each other by
//! index; edges are only created when a node is inserted, and every parent
//! must already exist, so the graph cannot contain a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::info;

use crate::domain::{Modality, SubjectId, Timecourse, TimecourseId};
use crate::error::ExpdbError;

#[derive(Debug, Clone)]
struct Node {
    timecourse: Timecourse,
    parents: Vec<usize>,
    children: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    nodes: Vec<Node>,
    index: HashMap<TimecourseId, usize>,
    paths: HashSet<String>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TimecourseId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: TimecourseId) -> Option<&Timecourse> {
        self.index.get(&id).map(|&slot| &self.nodes[slot].timecourse)
    }

    /// Timecourses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Timecourse> {
        self.nodes.iter().map(|node| &node.timecourse)
    }

    /// Direct parents in the order they were recorded.
    pub fn parents(&self, id: TimecourseId) -> Result<Vec<&Timecourse>, ExpdbError> {
        let slot = self.slot(id)?;
        Ok(self.nodes[slot]
            .parents
            .iter()
            .map(|&parent| &self.nodes[parent].timecourse)
            .collect())
    }

    pub fn children(&self, id: TimecourseId) -> Result<Vec<&Timecourse>, ExpdbError> {
        let slot = self.slot(id)?;
        Ok(self.nodes[slot]
            .children
            .iter()
            .map(|&child| &self.nodes[child].timecourse)
            .collect())
    }

    /// Ids of the weakly-connected component containing `id`, ascending.
    pub fn component(&self, id: TimecourseId) -> Result<Vec<TimecourseId>, ExpdbError> {
        let slot = self.slot(id)?;
        let mut ids: Vec<TimecourseId> = self
            .component_slots(&[slot])
            .into_iter()
            .map(|slot| self.nodes[slot].timecourse.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Ids whose pilot flag would change if the component at `id` were set to
    /// `is_pilot`. Does not modify the graph.
    pub fn pilot_changes(
        &self,
        id: TimecourseId,
        is_pilot: bool,
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        let slot = self.slot(id)?;
        Ok(self.differing(&[slot], is_pilot))
    }

    /// Sets the flag on `id` and on everything weakly connected to it.
    /// Returns the ids whose flag changed.
    pub fn set_is_pilot(
        &mut self,
        id: TimecourseId,
        is_pilot: bool,
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        let changed = self.pilot_changes(id, is_pilot)?;
        self.apply_pilot(&changed, is_pilot);
        if !changed.is_empty() {
            info!(%id, is_pilot, changed = changed.len(), "propagated pilot flag");
        }
        Ok(changed)
    }

    /// Ids that would take `is_pilot` from a new node linked to `derived_from`.
    pub fn merge_changes(
        &self,
        is_pilot: bool,
        derived_from: &[TimecourseId],
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        let slots = derived_from
            .iter()
            .map(|&parent| self.slot(parent))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.differing(&slots, is_pilot))
    }

    /// Adds a node and its parent edges. When the node joins components with
    /// a different pilot flag, the node's flag is propagated; the changed ids
    /// are returned.
    pub fn insert(
        &mut self,
        timecourse: Timecourse,
        derived_from: &[TimecourseId],
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        if self.index.contains_key(&timecourse.id) {
            return Err(ExpdbError::Integrity(format!(
                "timecourse {} already exists",
                timecourse.id
            )));
        }
        if self.paths.contains(&timecourse.path) {
            return Err(ExpdbError::Integrity(format!(
                "path {} is already in use",
                timecourse.path
            )));
        }
        let mut parents = Vec::with_capacity(derived_from.len());
        for &parent in derived_from {
            let slot = self.index.get(&parent).copied().ok_or_else(|| {
                ExpdbError::Integrity(format!("parent timecourse {parent} does not exist"))
            })?;
            if !parents.contains(&slot) {
                parents.push(slot);
            }
        }

        let is_pilot = timecourse.is_pilot;
        let changed = self.differing(&parents, is_pilot);
        self.apply_pilot(&changed, is_pilot);

        let slot = self.nodes.len();
        for &parent in &parents {
            self.nodes[parent].children.push(slot);
        }
        self.index.insert(timecourse.id, slot);
        self.paths.insert(timecourse.path.clone());
        self.nodes.push(Node {
            timecourse,
            parents,
            children: Vec::new(),
        });
        if !changed.is_empty() {
            info!(changed = changed.len(), is_pilot, "merged components took the new pilot flag");
        }
        Ok(changed)
    }

    /// Follows parents of the same modality and data type back to the
    /// recording they came from. Among several matching parents the lowest id
    /// is followed. An upload is its own original.
    pub fn find_original_upload(&self, id: TimecourseId) -> Result<&Timecourse, ExpdbError> {
        let mut current = self.slot(id)?;
        let data = self.nodes[current].timecourse.data;
        let mut visited = HashSet::from([current]);
        loop {
            let next = self.nodes[current]
                .parents
                .iter()
                .copied()
                .filter(|&parent| {
                    let other = &self.nodes[parent].timecourse.data;
                    other.modality() == data.modality() && other.data_type() == data.data_type()
                })
                .filter(|parent| !visited.contains(parent))
                .min_by_key(|&parent| self.nodes[parent].timecourse.id);
            match next {
                Some(parent) => {
                    visited.insert(parent);
                    current = parent;
                }
                None => return Ok(&self.nodes[current].timecourse),
            }
        }
    }

    /// Most recently collected descendant of `id` at any depth; equal dates
    /// go to the higher id. `None` when nothing derives from `id`.
    pub fn find_latest_derived(&self, id: TimecourseId) -> Result<Option<&Timecourse>, ExpdbError> {
        let start = self.slot(id)?;
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut latest: Option<&Timecourse> = None;
        while let Some(slot) = queue.pop_front() {
            for &child in &self.nodes[slot].children {
                if !visited.insert(child) {
                    continue;
                }
                let candidate = &self.nodes[child].timecourse;
                if latest.is_none_or(|best| newer(candidate, best)) {
                    latest = Some(candidate);
                }
                queue.push_back(child);
            }
        }
        Ok(latest)
    }

    /// For each upload of `subject` in `modality`, the most recently collected
    /// timecourse whose original upload it is (the upload itself if nothing
    /// else traces back to it). Results follow upload id order.
    pub fn latest_by_modality(&self, subject: SubjectId, modality: Modality) -> Vec<&Timecourse> {
        let mut candidates: Vec<usize> = (0..self.nodes.len())
            .filter(|&slot| {
                let timecourse = &self.nodes[slot].timecourse;
                timecourse.subject.id == subject && timecourse.data.modality() == modality
            })
            .collect();
        candidates.sort_by_key(|&slot| self.nodes[slot].timecourse.id);

        let origins: Vec<TimecourseId> = candidates
            .iter()
            .map(|&slot| {
                self.find_original_upload(self.nodes[slot].timecourse.id)
                    .map(|origin| origin.id)
                    .unwrap_or(self.nodes[slot].timecourse.id)
            })
            .collect();

        candidates
            .iter()
            .filter(|&&slot| self.nodes[slot].parents.is_empty())
            .map(|&upload| {
                let upload_id = self.nodes[upload].timecourse.id;
                candidates
                    .iter()
                    .zip(&origins)
                    .filter(|(_, origin)| **origin == upload_id)
                    .map(|(&slot, _)| &self.nodes[slot].timecourse)
                    .fold(&self.nodes[upload].timecourse, |best, candidate| {
                        if newer(candidate, best) { candidate } else { best }
                    })
            })
            .collect()
    }

    fn slot(&self, id: TimecourseId) -> Result<usize, ExpdbError> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| ExpdbError::NotFound(format!("timecourse {id}")))
    }

    /// Worklist traversal over both edge directions.
    fn component_slots(&self, start: &[usize]) -> Vec<usize> {
        let mut visited: HashSet<usize> = start.iter().copied().collect();
        let mut stack: Vec<usize> = start.to_vec();
        while let Some(slot) = stack.pop() {
            let node = &self.nodes[slot];
            for &next in node.parents.iter().chain(&node.children) {
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        let mut slots: Vec<usize> = visited.into_iter().collect();
        slots.sort_unstable();
        slots
    }

    fn differing(&self, start: &[usize], is_pilot: bool) -> Vec<TimecourseId> {
        let mut ids: Vec<TimecourseId> = self
            .component_slots(start)
            .into_iter()
            .filter(|&slot| self.nodes[slot].timecourse.is_pilot != is_pilot)
            .map(|slot| self.nodes[slot].timecourse.id)
            .collect();
        ids.sort();
        ids
    }

    fn apply_pilot(&mut self, ids: &[TimecourseId], is_pilot: bool) {
        for id in ids {
            if let Some(&slot) = self.index.get(id) {
                self.nodes[slot].timecourse.is_pilot = is_pilot;
            }
        }
    }
}

fn newer(candidate: &Timecourse, best: &Timecourse) -> bool {
    (candidate.date_collected, candidate.id) > (best.date_collected, best.id)
}

//! Simulation input file loading (C12): parses the JSON array of task
//! definitions and registration events consumed by the replay driver.
//!
//! Grounded in `CSimQueue::loadTaskEvents`: a flat JSON array mixing
//! `TASKDEF` entries (one per task, ids assigned in file order) and
//! `TASKREG` entries (a tick plus a list of previously defined task ids
//! that arrive together). A `TASKREG`'s tasks are re-expressed as a single
//! intra-batch `NewTaskSpec` list exactly the way a real TASKLIST record
//! would be: dependency ids are rewritten to positions within that same
//! batch, and registration fails loudly if a dependency wasn't included in
//! the batch, mirroring the original's predecessor-remap loop.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use sched_core::task::ResourceId;
use sched_core::task_database::NewTaskSpec;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SimFileEntry {
    #[serde(rename = "TASKDEF")]
    TaskDef {
        id: u32,
        name: String,
        size: u64,
        checkpoints: u32,
        #[serde(default)]
        dependencies: Vec<u32>,
        resources: Vec<String>,
    },
    #[serde(rename = "TASKREG")]
    TaskReg { time: u64, tasks: Vec<u32> },
}

struct TaskDef {
    name: String,
    size: u64,
    checkpoints: u32,
    dependencies: Vec<u32>,
    resources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskArrivalBatch {
    pub specs: Vec<NewTaskSpec>,
}

pub struct SimFile {
    pub arrivals: Vec<(u64, TaskArrivalBatch)>,
}

pub fn load(path: &Path, resolve_resource: impl Fn(&str) -> Option<ResourceId>) -> Result<SimFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read simulation file {}", path.display()))?;
    let entries: Vec<SimFileEntry> =
        serde_json::from_str(&text).context("simulation file is not a valid JSON array")?;
    if entries.is_empty() {
        bail!("simulation file has no entries");
    }

    let mut defs: Vec<TaskDef> = Vec::new();
    let mut arrivals: Vec<(u64, Vec<u32>)> = Vec::new();

    for entry in entries {
        match entry {
            SimFileEntry::TaskDef {
                id,
                name,
                size,
                checkpoints,
                dependencies,
                resources,
            } => {
                if id as usize != defs.len() {
                    bail!("TASKDEF entries must appear with sequential ids, expected {}, got {id}", defs.len());
                }
                for &dep in &dependencies {
                    if dep >= id {
                        bail!("TASKDEF {id} depends on {dep}, which is not defined earlier in the file");
                    }
                }
                if resources.is_empty() {
                    bail!("TASKDEF {id} lists no resources");
                }
                defs.push(TaskDef {
                    name,
                    size,
                    checkpoints,
                    dependencies,
                    resources,
                });
            }
            SimFileEntry::TaskReg { time, tasks } => {
                if tasks.is_empty() {
                    bail!("TASKREG at tick {time} has no tasks");
                }
                for &t in &tasks {
                    if t as usize >= defs.len() {
                        bail!("TASKREG at tick {time} references undefined task {t}");
                    }
                }
                arrivals.push((time, tasks));
            }
        }
    }

    let mut resource_cache: HashMap<String, ResourceId> = HashMap::new();
    let mut batches = Vec::with_capacity(arrivals.len());

    for (tick, task_ids) in arrivals {
        // Map each referenced definition id to its position within this
        // batch, so dependencies can be rewritten to batch-local indices.
        let position_of: HashMap<u32, usize> =
            task_ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();

        let mut specs = Vec::with_capacity(task_ids.len());
        for (pos, &def_id) in task_ids.iter().enumerate() {
            let def = &defs[def_id as usize];

            let mut valid_resources = Vec::with_capacity(def.resources.len());
            for name in &def.resources {
                let id = if let Some(&cached) = resource_cache.get(name) {
                    cached
                } else {
                    let Some(id) = resolve_resource(name) else {
                        bail!("TASKDEF {def_id} references unknown resource {name:?}");
                    };
                    resource_cache.insert(name.clone(), id);
                    id
                };
                valid_resources.push(id);
            }

            let mut dependencies = Vec::with_capacity(def.dependencies.len());
            for dep in &def.dependencies {
                let Some(&local) = position_of.get(dep) else {
                    bail!(
                        "TASKREG at tick {tick}: task {def_id} depends on task {dep}, which is not part of the same batch"
                    );
                };
                if local >= pos {
                    bail!(
                        "TASKREG at tick {tick}: task {def_id} depends on {dep}, which arrives no earlier in the batch"
                    );
                }
                dependencies.push(local);
            }

            specs.push(NewTaskSpec {
                name: def.name.clone(),
                size: def.size,
                checkpoints: def.checkpoints,
                valid_resources,
                dependencies,
            });
        }

        batches.push((tick, TaskArrivalBatch { specs }));
    }

    Ok(SimFile { arrivals: batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    fn resolver(name: &str) -> Option<ResourceId> {
        match name {
            "cpu0" => Some(0),
            "cpu1" => Some(1),
            _ => None,
        }
    }

    #[test]
    fn loads_single_arrival_with_dependency() {
        let json = r#"[
            {"type":"TASKDEF","id":0,"name":"a","size":10,"checkpoints":2,"resources":["cpu0"]},
            {"type":"TASKDEF","id":1,"name":"b","size":5,"checkpoints":1,"dependencies":[0],"resources":["cpu0","cpu1"]},
            {"type":"TASKREG","time":0,"tasks":[0,1]}
        ]"#;
        let f = write_tmp(json);
        let sim = load(f.path(), resolver).unwrap();
        assert_eq!(sim.arrivals.len(), 1);
        let (tick, batch) = &sim.arrivals[0];
        assert_eq!(*tick, 0);
        assert_eq!(batch.specs.len(), 2);
        assert_eq!(batch.specs[1].dependencies, vec![0]);
        assert_eq!(batch.specs[1].valid_resources, vec![0, 1]);
    }

    #[test]
    fn rejects_dependency_outside_batch() {
        let json = r#"[
            {"type":"TASKDEF","id":0,"name":"a","size":10,"checkpoints":2,"resources":["cpu0"]},
            {"type":"TASKDEF","id":1,"name":"b","size":5,"checkpoints":1,"dependencies":[0],"resources":["cpu0"]},
            {"type":"TASKREG","time":0,"tasks":[1]}
        ]"#;
        let f = write_tmp(json);
        assert!(load(f.path(), resolver).is_err());
    }

    #[test]
    fn rejects_unknown_resource() {
        let json = r#"[
            {"type":"TASKDEF","id":0,"name":"a","size":10,"checkpoints":2,"resources":["gpu9"]},
            {"type":"TASKREG","time":0,"tasks":[0]}
        ]"#;
        let f = write_tmp(json);
        assert!(load(f.path(), resolver).is_err());
    }
}

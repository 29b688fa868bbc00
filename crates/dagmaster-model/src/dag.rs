use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::enums::TaskDependType;
use crate::errors::{ModelError, ModelResult};
use crate::task_node::TaskNode;

/// In-memory DAG keyed by node name, with adjacency tracked in both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dag {
    nodes: HashMap<String, TaskNode>,
    /// name -> names of direct successors
    forward: HashMap<String, Vec<String>>,
}

impl Dag {
    pub fn from_nodes(nodes: Vec<TaskNode>) -> ModelResult<Self> {
        let mut by_name = HashMap::new();
        for node in &nodes {
            if by_name.insert(node.name.clone(), node.clone()).is_some() {
                return Err(ModelError::duplicate_node(node.name.clone()));
            }
        }
        for node in &nodes {
            for dep in &node.deps {
                if !by_name.contains_key(dep) {
                    return Err(ModelError::unknown_dependency(node.name.clone(), dep.clone()));
                }
            }
        }
        let mut forward: HashMap<String, Vec<String>> =
            by_name.keys().map(|name| (name.clone(), Vec::new())).collect();
        for node in &nodes {
            for dep in &node.deps {
                forward.entry(dep.clone()).or_default().push(node.name.clone());
            }
        }
        let dag = Self { nodes: by_name, forward };
        dag.check_acyclic()?;
        Ok(dag)
    }

    fn check_acyclic(&self) -> ModelResult<()> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for name in self.nodes.keys() {
            if !visited.contains(name) {
                self.visit(name, &mut visiting, &mut visited)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) -> ModelResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(ModelError::cyclic(name));
        }
        for succ in self.successors(name) {
            self.visit(succ, visiting, visited)?;
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn successors(&self, name: &str) -> &[String] {
        self.forward.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn sources(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.is_source() && !n.is_forbidden())
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Removes forbidden nodes, keeping their edges bridged out (a forbidden
    /// node's successors become reachable via its own parents).
    pub fn prune_forbidden(&self) -> Dag {
        let forbidden: HashSet<&str> = self
            .nodes
            .values()
            .filter(|n| n.is_forbidden())
            .map(|n| n.name.as_str())
            .collect();
        if forbidden.is_empty() {
            return self.clone();
        }
        let kept: Vec<TaskNode> = self
            .nodes
            .values()
            .filter(|n| !n.is_forbidden())
            .cloned()
            .map(|mut node| {
                node.deps = node
                    .deps
                    .into_iter()
                    .flat_map(|d| self.bridge(&d, &forbidden))
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                node
            })
            .collect();
        Dag::from_nodes(kept).unwrap_or_default()
    }

    fn bridge(&self, dep: &str, forbidden: &HashSet<&str>) -> Vec<String> {
        if !forbidden.contains(dep) {
            return vec![dep.to_string()];
        }
        let Some(node) = self.nodes.get(dep) else {
            return Vec::new();
        };
        node.deps
            .iter()
            .flat_map(|d| self.bridge(d, forbidden))
            .collect()
    }
}

/// The reachable subgraph of a `Dag` given a set of start nodes, a set of
/// recovery nodes and an expansion direction. Produced by `generate_flow_dag`.
#[derive(Debug, Clone)]
pub struct ProcessDag {
    pub dag: Dag,
}

/// Slices `source` to the subgraph reachable from `start_node_names` (cold start)
/// or `recovery_node_names` (resume), expanded per `depend_type`.
pub fn generate_flow_dag(
    source: &Dag,
    start_node_names: &[String],
    recovery_node_names: &[String],
    depend_type: TaskDependType,
) -> ModelResult<ProcessDag> {
    let pruned = source.prune_forbidden();

    let roots: Vec<String> = if !recovery_node_names.is_empty() {
        recovery_node_names.to_vec()
    } else if !start_node_names.is_empty() {
        for name in start_node_names {
            if pruned.node(name).is_none() {
                return Err(ModelError::UnknownStartNode { name: name.clone() });
            }
        }
        start_node_names.to_vec()
    } else {
        return Ok(ProcessDag { dag: pruned });
    };

    let mut keep: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = roots.into_iter().collect();
    while let Some(name) = queue.pop_front() {
        if !keep.insert(name.clone()) {
            continue;
        }
        if matches!(depend_type, TaskDependType::Forward | TaskDependType::All) {
            for succ in pruned.successors(&name) {
                queue.push_back(succ.clone());
            }
        }
        if matches!(depend_type, TaskDependType::Backward | TaskDependType::All) {
            if let Some(node) = pruned.node(&name) {
                for dep in &node.deps {
                    queue.push_back(dep.clone());
                }
            }
        }
    }

    let kept_nodes: Vec<TaskNode> = keep
        .iter()
        .filter_map(|name| pruned.node(name).cloned())
        .map(|mut node| {
            node.deps.retain(|d| keep.contains(d));
            node
        })
        .collect();

    Ok(ProcessDag {
        dag: Dag::from_nodes(kept_nodes)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> Dag {
        Dag::from_nodes(vec![
            TaskNode::new("A", "shell"),
            TaskNode::new("B", "shell").with_deps(["A"]),
            TaskNode::new("C", "shell").with_deps(["B"]),
        ])
        .unwrap()
    }

    #[test]
    fn detects_cycles() {
        let err = Dag::from_nodes(vec![
            TaskNode::new("A", "shell").with_deps(["B"]),
            TaskNode::new("B", "shell").with_deps(["A"]),
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::CyclicDag { .. }));
    }

    #[test]
    fn detects_unknown_dependency() {
        let err = Dag::from_nodes(vec![TaskNode::new("A", "shell").with_deps(["Z"])]).unwrap_err();
        assert!(matches!(err, ModelError::UnknownDependency { .. }));
    }

    #[test]
    fn sources_are_nodes_with_no_deps() {
        let dag = linear();
        assert_eq!(dag.sources(), vec!["A"]);
    }

    #[test]
    fn prune_forbidden_bridges_edges() {
        let dag = Dag::from_nodes(vec![
            TaskNode::new("A", "shell"),
            {
                let mut b = TaskNode::new("B", "shell").with_deps(["A"]);
                b.flag = crate::enums::NodeFlag::No;
                b
            },
            TaskNode::new("C", "shell").with_deps(["B"]),
        ])
        .unwrap();
        let pruned = dag.prune_forbidden();
        assert_eq!(pruned.len(), 2);
        assert_eq!(pruned.node("C").unwrap().deps, vec!["A".to_string()]);
    }

    #[test]
    fn generate_flow_dag_with_no_filters_returns_full_graph() {
        let dag = linear();
        let flow = generate_flow_dag(&dag, &[], &[], TaskDependType::All).unwrap();
        assert_eq!(flow.dag.len(), 3);
    }

    #[test]
    fn generate_flow_dag_forward_from_start_node() {
        let dag = linear();
        let flow = generate_flow_dag(
            &dag,
            &["B".to_string()],
            &[],
            TaskDependType::Forward,
        )
        .unwrap();
        let mut names: Vec<&String> = flow.dag.node_names().collect();
        names.sort();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn generate_flow_dag_rejects_unknown_start_node() {
        let dag = linear();
        let err = generate_flow_dag(&dag, &["Q".to_string()], &[], TaskDependType::All).unwrap_err();
        assert!(matches!(err, ModelError::UnknownStartNode { .. }));
    }
}

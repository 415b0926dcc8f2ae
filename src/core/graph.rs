use crate::domain::model::DeployableUnit;
use crate::utils::error::{OrchestratorError, Result};
use crate::utils::validation::find_duplicate;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Ordering constraints between deployable units.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    units: BTreeMap<String, DeployableUnit>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 逐一加入：依賴必須已存在於圖中
    pub fn add_unit(&mut self, unit: DeployableUnit) -> Result<()> {
        if self.units.contains_key(&unit.id) {
            return Err(OrchestratorError::DuplicateUnit(unit.id));
        }
        if let Some(missing) = unit
            .dependencies
            .iter()
            .find(|dep| !self.units.contains_key(*dep))
        {
            return Err(OrchestratorError::UnknownDependency {
                unit: unit.id.clone(),
                dependency: missing.clone(),
            });
        }

        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    /// Bulk construction for graph files, where a unit may reference one
    /// declared further down. Cycles are rejected here as well.
    pub fn build(units: Vec<DeployableUnit>) -> Result<Self> {
        if let Some(duplicate) = find_duplicate(units.iter().map(|u| u.id.as_str())) {
            return Err(OrchestratorError::DuplicateUnit(duplicate.to_string()));
        }

        let units: BTreeMap<String, DeployableUnit> =
            units.into_iter().map(|u| (u.id.clone(), u)).collect();

        for unit in units.values() {
            if let Some(missing) = unit.dependencies.iter().find(|dep| !units.contains_key(*dep)) {
                return Err(OrchestratorError::UnknownDependency {
                    unit: unit.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let graph = Self { units };
        graph.topological_order()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, id: &str) -> Option<&DeployableUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &DeployableUnit> {
        self.units.values()
    }

    /// Units without dependencies, ascending id.
    pub fn roots(&self) -> Vec<&str> {
        self.units
            .values()
            .filter(|u| u.dependencies.is_empty())
            .map(|u| u.id.as_str())
            .collect()
    }

    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.units
            .values()
            .filter(|u| u.dependencies.contains(id))
            .map(|u| u.id.as_str())
            .collect()
    }

    /// Every dependency precedes its dependents. Depth-first with three-colour
    /// marking; roots and edges are walked in ascending id so the result is
    /// stable for a given unit set.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.units.len());
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.units.len());

        for id in self.units.keys() {
            self.visit(id, &mut marks, &mut path, &mut order)?;
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                // 回邊：path 中從 id 開始的部分即為循環
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
                cycle.push(id.to_string());
                return Err(OrchestratorError::CycleDetected { cycle });
            }
            None => {}
        }

        marks.insert(id, Mark::InProgress);
        path.push(id);

        if let Some(unit) = self.units.get(id) {
            for dep in &unit.dependencies {
                self.visit(dep.as_str(), marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        order.push(id.to_string());
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityOracle;
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    /// Sweeps the elimination pass performs internally before giving up on a fixed point.
    pub max_elimination_iters: usize,
    /// Bound on pipeline fixed-point steps.
    pub fixed_point_iters: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            max_elimination_iters: 16,
            fixed_point_iters: 4,
        }
    }
}

impl OptimizeConfig {
    /// Parses a JSON config; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

pub struct OptimizeContext<'a> {
    oracle: &'a dyn CapabilityOracle,
    schemas: &'a dyn SchemaRegistry,
    pub(crate) cfg: OptimizeConfig,
}

impl<'a> OptimizeContext<'a> {
    pub fn new(
        oracle: &'a dyn CapabilityOracle,
        schemas: &'a dyn SchemaRegistry,
        cfg: OptimizeConfig,
    ) -> Self {
        Self {
            oracle,
            schemas,
            cfg,
        }
    }

    pub fn oracle(&self) -> &'a dyn CapabilityOracle {
        self.oracle
    }

    pub fn schemas(&self) -> &'a dyn SchemaRegistry {
        self.schemas
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }
}

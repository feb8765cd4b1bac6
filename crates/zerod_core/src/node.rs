use crate::dof::DofRegistry;

/// A connection point between blocks. Owns no state; its job is to route
/// a pressure and a flow DOF into the registry under canonical names
/// `pressure:<node>` and `flow:<node>`.
#[derive(Debug)]
pub struct Node {
    id: usize,
    name: String,
    pub(crate) inlet_blocks: Vec<usize>,
    pub(crate) outlet_blocks: Vec<usize>,
    pressure_dof: Option<usize>,
    flow_dof: Option<usize>,
}

impl Node {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inlet_blocks: Vec::new(),
            outlet_blocks: Vec::new(),
            pressure_dof: None,
            flow_dof: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inlet_blocks(&self) -> &[usize] {
        &self.inlet_blocks
    }

    pub fn outlet_blocks(&self) -> &[usize] {
        &self.outlet_blocks
    }

    /// Registers the node's two DOFs. Must be called exactly once, during
    /// model finalization.
    pub fn setup_dofs(&mut self, dofs: &mut DofRegistry) {
        self.pressure_dof = Some(dofs.register_variable(format!("pressure:{}", self.name)));
        self.flow_dof = Some(dofs.register_variable(format!("flow:{}", self.name)));
    }

    pub fn pressure_dof(&self) -> usize {
        self.pressure_dof
            .expect("node DOFs not set up: finalize() was not called")
    }

    pub fn flow_dof(&self) -> usize {
        self.flow_dof
            .expect("node DOFs not set up: finalize() was not called")
    }
}

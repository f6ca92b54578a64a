//! Test data builders for address spaces

use uabrowser::backend::MockAddressSpace;

/// Builder for a folder of variables directly below Objects
pub struct FolderBuilder {
    id: String,
    variables: Vec<String>,
    methods: Vec<String>,
}

impl FolderBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            variables: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Add variables; children are ordered by name in the tree
    pub fn variables(mut self, names: &[&str]) -> Self {
        self.variables.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn method(mut self, name: &str) -> Self {
        self.methods.push(name.to_string());
        self
    }

    /// Node id of a child created by this builder
    pub fn child_id(&self, name: &str) -> String {
        format!("{}.{}", self.id, name)
    }

    pub fn build(self) -> MockAddressSpace {
        let mut space = MockAddressSpace::new().with_folder(MockAddressSpace::OBJECTS, &self.id, &self.id);
        for name in &self.variables {
            space = space.with_variable(&self.id, &self.child_id(name), name, 0.0);
        }
        for name in &self.methods {
            space = space.with_method(&self.id, &self.child_id(name), name);
        }
        space
    }
}

/// The three-child folder used by the lifecycle scenarios
pub fn abc_space() -> MockAddressSpace {
    FolderBuilder::new("P").variables(&["A", "B", "C"]).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uabrowser::types::NodeId;

    #[test]
    fn test_folder_builder() {
        let builder = FolderBuilder::new("P").variables(&["A"]).method("Run");
        assert_eq!(builder.child_id("A"), "P.A");

        let space = builder.build();
        let folder = space.node(&NodeId::new("P")).unwrap();
        assert_eq!(folder.children.len(), 2);
    }
}

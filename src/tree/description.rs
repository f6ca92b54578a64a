//! Description and data-type column loader
//!
//! Each tree row shows the node's Description and DataType. Both are read in
//! one attribute request on a worker thread after the row is added.

use crate::backend::client_trait::UaClient;
use crate::error::{Result, ResultExt};
use crate::types::{AttributeId, NodeId, Variant};

/// Loaded description/data-type columns of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    pub node: NodeId,
    pub description: String,
    /// Display name of the value's data type, if the node has one
    pub data_type: Option<String>,
}

/// Name of a namespace-0 built-in data type
pub fn data_type_to_string(id: &NodeId) -> String {
    let name = match id.as_str() {
        "i=1" => "Boolean",
        "i=2" => "SByte",
        "i=3" => "Byte",
        "i=4" => "Int16",
        "i=5" => "UInt16",
        "i=6" => "Int32",
        "i=7" => "UInt32",
        "i=8" => "Int64",
        "i=9" => "UInt64",
        "i=10" => "Float",
        "i=11" => "Double",
        "i=12" => "String",
        "i=13" => "DateTime",
        "i=14" => "Guid",
        "i=15" => "ByteString",
        "i=17" => "NodeId",
        "i=21" => "LocalizedText",
        "i=24" => "BaseDataType",
        "i=26" => "Number",
        other => other,
    };
    name.to_string()
}

/// Read the Description and DataType attributes of `node`
pub fn load_description(client: &dyn UaClient, node: &NodeId) -> Result<NodeDescription> {
    let attrs = client
        .get_node(node.clone())
        .read_attributes(&[AttributeId::Description, AttributeId::DataType])
        .with_context(|| format!("Failed to read description of {}", node))?;

    let description = match attrs.first().map(|dv| &dv.value) {
        Some(Variant::String(s)) if s != "no description" => s.clone(),
        _ => String::new(),
    };
    let data_type = match attrs.get(1).map(|dv| &dv.value) {
        Some(Variant::NodeId(id)) => Some(data_type_to_string(id)),
        _ => None,
    };

    Ok(NodeDescription {
        node: node.clone(),
        description,
        data_type,
    })
}

//! Resource model.
//!
//! Typed representation of desired resources: identities, attribute values
//! with embedded references, and the nodes the graph builder links together.

mod resource;
mod value;

pub use resource::{
    is_valid_kind, is_valid_resource_name, Attributes, Ensure, ResourceId, ResourceNode,
};
pub use value::{resolve_attributes, AttrValue, Reference, Segment};

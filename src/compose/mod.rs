pub(crate) mod errors;
pub(crate) mod layer_stack;
pub(crate) mod prim_index;

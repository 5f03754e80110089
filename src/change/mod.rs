pub(crate) mod edit;
pub(crate) mod notice;
pub(crate) mod processor;

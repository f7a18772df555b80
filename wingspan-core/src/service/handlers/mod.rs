pub(crate) mod metadata;
pub(crate) mod prepared;
pub(crate) mod statement;

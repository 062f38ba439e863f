pub(crate) mod ledger;
pub(crate) mod meta;
pub(crate) mod sync;

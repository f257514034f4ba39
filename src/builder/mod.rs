//! Statement construction.
//!
//! Pure functions that turn a template plus arguments into a [`Statement`]
//! whose argument count matches its `?` placeholders. Nothing here touches
//! a connection.
//!
//! - [`bind_positional`], [`bind_named`], [`bind_record`], [`bind_named_batch`]
//! - [`expand_in`], [`expand_in_clause`] for `IN (...)` lists
//! - [`build_multi_row_insert`], [`insert_records`]
//! - [`rebind`] to a backend's placeholder dialect
//!
//! [`Statement`]: crate::models::Statement

mod bind;
mod expand;
mod rebind;
pub(crate) mod scan;

pub use bind::{NamedArgs, bind_named, bind_named_batch, bind_positional, bind_record};
pub use expand::{Arg, build_multi_row_insert, expand_in, expand_in_clause, insert_records};
pub use rebind::rebind;

//! Engine-agnostic schema migration planning.
//!
//! Each engine keeps an ordered list of [`Migration`]s numbered `1..=N`,
//! stores the applied version under
//! [`SCHEMA_VERSION_KEY`](crate::backend::SCHEMA_VERSION_KEY), and on open
//! runs [`pending`] in a single transaction. Migrations may only touch
//! derived data: the event log and entity snapshots are never rewritten.

use crate::{Error, Result};

/// One schema step. `apply` is engine-specific, typically a function taking
/// the engine's write transaction.
#[derive(Debug, Clone, Copy)]
pub struct Migration<F> {
  pub version:     u32,
  pub description: &'static str,
  pub apply:       F,
}

/// The newest version described by `migrations`.
pub fn latest_version<F>(migrations: &[Migration<F>]) -> u32 {
  migrations.last().map_or(0, |m| m.version)
}

/// The migrations to run, in order, to move a store at `current` (`None` for
/// a fresh store) to `target`.
///
/// Fails if the store is newer than `target` or `target` is beyond the
/// newest known migration.
pub fn pending<F>(
  migrations: &[Migration<F>],
  current: Option<u32>,
  target: u32,
) -> Result<&[Migration<F>]> {
  let current = current.unwrap_or(0);
  let latest = latest_version(migrations);

  if target > latest {
    return Err(Error::Migration(format!(
      "target schema version {target} is newer than the latest known version {latest}"
    )));
  }
  if current > target {
    return Err(Error::Migration(format!(
      "store is at schema version {current}, newer than supported version {target}"
    )));
  }
  for (index, migration) in migrations.iter().enumerate() {
    let expected = index as u32 + 1;
    if migration.version != expected {
      return Err(Error::Migration(format!(
        "migration list is not contiguous: found version {} at position {expected}",
        migration.version
      )));
    }
  }

  Ok(&migrations[current as usize..target as usize])
}

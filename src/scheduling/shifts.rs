use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::models::{Position, Shift};
use crate::schema::{position_assignments, position_shifts, positions};
use crate::scheduling::templates::ShiftSpec;

pub fn shifts_for_position(conn: &mut PgConnection, position_id: Uuid) -> QueryResult<Vec<Shift>> {
    position_shifts::table
        .filter(position_shifts::position_id.eq(position_id))
        .order((position_shifts::sequence.asc(), position_shifts::start_time.asc()))
        .load(conn)
}

/// Inserts `specs` after the position's current shifts, numbering from
/// `existing + 1`.
pub fn append_shifts(
    conn: &mut PgConnection,
    position_id: Uuid,
    existing: usize,
    specs: Vec<ShiftSpec>,
) -> QueryResult<Vec<Shift>> {
    let rows: Vec<_> = specs
        .into_iter()
        .enumerate()
        .map(|(index, spec)| spec.into_new_shift(position_id, (existing + index + 1) as i32))
        .collect();
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    diesel::insert_into(position_shifts::table)
        .values(&rows)
        .get_results(conn)
}

/// Locks the position row for the rest of the transaction so concurrent
/// writers see each other's shifts. Must run inside a transaction.
pub fn lock_position(conn: &mut PgConnection, position_id: Uuid) -> QueryResult<Uuid> {
    positions::table
        .find(position_id)
        .select(positions::id)
        .for_update()
        .first(conn)
}

/// Returns the position's "All Day" shift, creating it when the position has
/// no shifts at all. `None` means the position only has timed shifts.
pub fn ensure_default_shift(
    conn: &mut PgConnection,
    position_id: Uuid,
) -> QueryResult<Option<Shift>> {
    lock_position(conn, position_id)?;
    let existing = shifts_for_position(conn, position_id)?;
    if existing.is_empty() {
        let mut created = append_shifts(conn, position_id, 0, vec![ShiftSpec::all_day()])?;
        return Ok(created.pop());
    }
    Ok(existing.into_iter().find(|shift| shift.is_all_day))
}

/// Active positions that have no shift yet.
pub fn positions_without_shifts(conn: &mut PgConnection) -> QueryResult<Vec<Position>> {
    let with_shifts = position_shifts::table.select(position_shifts::position_id);
    positions::table
        .filter(positions::is_active.eq(true))
        .filter(positions::id.ne_all(with_shifts))
        .order((positions::event_id.asc(), positions::position_number.asc()))
        .load(conn)
}

/// Assignment ids whose shift belongs to a different position.
pub fn mismatched_assignments(conn: &mut PgConnection) -> QueryResult<Vec<(Uuid, Uuid, Uuid)>> {
    position_assignments::table
        .inner_join(position_shifts::table)
        .filter(position_shifts::position_id.ne(position_assignments::position_id))
        .select((
            position_assignments::id,
            position_assignments::position_id,
            position_shifts::position_id,
        ))
        .load(conn)
}

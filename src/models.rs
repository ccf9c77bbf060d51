use chrono::{NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password_hash: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub location: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub location: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = event_permissions)]
#[diesel(belongs_to(Event))]
pub struct EventPermission {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub scope_type: Option<String>,
    pub scope_ids: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = event_permissions)]
pub struct NewEventPermission {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub scope_type: Option<String>,
    pub scope_ids: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = attendants)]
pub struct Attendant {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub congregation: String,
    pub forms_of_service: Vec<String>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub pin_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Attendant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attendants)]
pub struct NewAttendant {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub congregation: String,
    pub forms_of_service: Vec<String>,
    pub is_active: bool,
    pub notes: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = event_attendants)]
#[diesel(belongs_to(Event))]
#[diesel(belongs_to(Attendant))]
pub struct EventAttendant {
    pub id: Uuid,
    pub event_id: Uuid,
    pub attendant_id: Uuid,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = event_attendants)]
pub struct NewEventAttendant {
    pub id: Uuid,
    pub event_id: Uuid,
    pub attendant_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = positions)]
#[diesel(belongs_to(Event))]
pub struct Position {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub area: Option<String>,
    pub sequence: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = positions)]
pub struct NewPosition {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub area: Option<String>,
    pub sequence: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = position_shifts)]
#[diesel(belongs_to(Position))]
pub struct Shift {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub sequence: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = position_shifts)]
pub struct NewShift {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub sequence: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = position_assignments)]
#[diesel(belongs_to(Position))]
#[diesel(belongs_to(Shift))]
pub struct Assignment {
    pub id: Uuid,
    pub position_id: Uuid,
    pub shift_id: Uuid,
    pub attendant_id: Uuid,
    pub role: String,
    pub notes: Option<String>,
    pub overseer_id: Option<Uuid>,
    pub keyman_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = position_assignments)]
pub struct NewAssignment {
    pub id: Uuid,
    pub position_id: Uuid,
    pub shift_id: Uuid,
    pub attendant_id: Uuid,
    pub role: String,
    pub notes: Option<String>,
    pub overseer_id: Option<Uuid>,
    pub keyman_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = position_oversight)]
#[diesel(belongs_to(Position))]
pub struct PositionOversight {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position_id: Uuid,
    pub overseer_id: Option<Uuid>,
    pub keyman_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = position_oversight)]
pub struct NewPositionOversight {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position_id: Uuid,
    pub overseer_id: Option<Uuid>,
    pub keyman_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = event_documents)]
#[diesel(belongs_to(Event))]
pub struct EventDocument {
    pub id: Uuid,
    pub event_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
    pub is_active: bool,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = event_documents)]
pub struct NewEventDocument {
    pub id: Uuid,
    pub event_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
}

use chrono::{DateTime, Utc};

use crate::models::session::{SessionContext, SessionRecord};

/// Builds new session records.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, context: &SessionContext, now: DateTime<Utc>) -> SessionRecord;
}

/// Captures the originating host and any initial attributes from the context.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleSessionFactory;

impl SessionFactory for SimpleSessionFactory {
    fn create_session(&self, context: &SessionContext, now: DateTime<Utc>) -> SessionRecord {
        let mut record = SessionRecord::with_host(now, context.host.clone());
        for (key, value) in &context.attributes {
            record.set_attribute(key.clone(), Some(value.clone()));
        }
        record
    }
}

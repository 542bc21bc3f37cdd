use std::fmt;

/// A committed change to one row, or to a whole table when `id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub entity: &'static str,
    pub table: String,
    pub id: Option<i64>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}/{id}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

pub trait ChangeObserver: Send + Sync {
    fn changed(&self, change: &Change);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ChangeObserver for NoopObserver {
    fn changed(&self, _change: &Change) {}
}

impl<F> ChangeObserver for F
where
    F: Fn(&Change) + Send + Sync,
{
    fn changed(&self, change: &Change) {
        self(change)
    }
}

use crate::parser::Record;

/// Destination of decoded records.
///
/// Called on the request's own task once per record, so a slow sink delays
/// the response to Logplex.
pub trait RecordSink<C>: Send + Sync {
    fn deliver(&self, record: Record<C>);
}

impl<C, F> RecordSink<C> for F
where
    F: Fn(Record<C>) + Send + Sync,
{
    fn deliver(&self, record: Record<C>) {
        self(record)
    }
}

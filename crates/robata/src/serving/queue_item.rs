use tokio::sync::oneshot::Sender;

/// # QueueItem
///
/// A pending request: the input to predict on and the channel its result
/// goes back through.
///
/// ## Type Parameters
///
/// * `I` - The input handed to the predictor
/// * `T` - What is sent back to the requester
pub(crate) struct QueueItem<I, T> {
    input: I,
    sender: Sender<T>,
}

impl<I, T> QueueItem<I, T> {
    pub(crate) fn new(input: I, sender: Sender<T>) -> Self {
        Self { input, sender }
    }

    /// Splits the item so the input can be consumed before answering
    pub(crate) fn into_parts(self) -> (I, Sender<T>) {
        (self.input, self.sender)
    }
}

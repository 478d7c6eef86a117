use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::error::{Error, Result};

/// # Item
///
/// The pending result of a submitted request.
///
/// Resolves to the prediction's own result, or to [`Error::IllegalState`] when
/// the service stopped before answering.
pub struct Item<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Item<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T>>) -> Self {
        Self { receiver }
    }
}

impl<T> Future for Item<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(Error::IllegalState(
                "prediction service stopped before responding".to_string(),
            )),
        })
    }
}

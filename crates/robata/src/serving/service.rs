use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, warn};
use crate::backend::Backend;
use crate::error::Result;
use crate::inference::Predictor;
use super::item::Item;
use super::queue_item::QueueItem;

/// Accepts prediction requests and answers them asynchronously.
///
/// # Type Parameters
///
/// * `I` - Request input
/// * `O` - Prediction output
#[async_trait]
pub trait PredictionService<I, O> {
    /// Enqueues `input`.
    ///
    /// # Returns
    ///
    /// A future resolving to the prediction's result once it has been run
    async fn submit(&self, input: I) -> Item<O>;
}

type Queue<I, O> = Arc<Mutex<Vec<QueueItem<I, Result<O>>>>>;

/// # PredictorService
///
/// Runs a [`Predictor`] on a background tokio task that owns it.
///
/// Requests queue up until the task wakes, then up to `S` of them are taken
/// and predicted one after another. The predictor is closed when the task
/// ends, whether through [`shutdown`](PredictorService::shutdown), by dropping
/// the service, or by the runtime shutting down. Requests still queued at that
/// point resolve to [`Error::IllegalState`](crate::Error::IllegalState).
///
/// Predictions are synchronous, so the task occupies a runtime thread while
/// it runs them.
pub struct PredictorService<I, O, const S: usize> {
    waiting_requests: Queue<I, O>,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
    /// `None` once [`shutdown`](PredictorService::shutdown) has taken it
    task: Option<JoinHandle<()>>,
}

impl<I, O, const S: usize> PredictorService<I, O, S>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Spawns the serving task. Must be called within a tokio runtime.
    pub fn new<B: Backend>(predictor: Predictor<B, I, O>) -> Self {
        let waiting_requests: Queue<I, O> = Arc::new(Mutex::new(vec![]));
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());

        let task = tokio::spawn({
            let predictor = ClosingPredictor(predictor);
            let running = running.clone();
            let notifier = notifier.clone();
            let waiting_requests = waiting_requests.clone();
            async move {
                serving_loop::<B, I, O, S>(&predictor.0, &running, &notifier, &waiting_requests).await;
            }
        });

        Self {
            waiting_requests,
            running,
            notifier,
            task: Some(task),
        }
    }

    /// Submits every input, then waits for all of them.
    ///
    /// # Returns
    ///
    /// One result per input, in input order
    pub async fn predict_all(&self, inputs: Vec<I>) -> Vec<Result<O>> {
        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            items.push(self.submit(input).await);
        }
        join_all(items).await
    }

    /// Number of requests not yet taken by the serving task
    pub async fn pending(&self) -> usize {
        self.waiting_requests.lock().await.len()
    }

    /// Stops the serving task and waits until it has closed the predictor.
    ///
    /// Requests already taken by the task are answered first.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "serving task ended abnormally");
            }
        }
    }
}

impl<I, O, const S: usize> PredictorService<I, O, S> {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();
    }
}

impl<I, O, const S: usize> Drop for PredictorService<I, O, S> {
    /// Signals the task without waiting for it. Needs no runtime.
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes the predictor when the serving task's future is dropped, including
/// when a runtime shuts down with the task still pending.
struct ClosingPredictor<B: Backend, I, O>(Predictor<B, I, O>);

impl<B: Backend, I, O> Drop for ClosingPredictor<B, I, O> {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[async_trait]
impl<I, O, const S: usize> PredictionService<I, O> for PredictorService<I, O, S>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn submit(&self, input: I) -> Item<O> {
        let (tx, rx) = oneshot::channel();
        {
            let mut requests = self.waiting_requests.lock().await;
            requests.push(QueueItem::new(input, tx));
        }
        self.notifier.notify_one();
        Item::new(rx)
    }
}

async fn serving_loop<B: Backend, I, O, const S: usize>(
    predictor: &Predictor<B, I, O>,
    running: &AtomicBool,
    notifier: &Notify,
    waiting_requests: &Mutex<Vec<QueueItem<I, Result<O>>>>,
) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let items = drain_possible_requests(S, waiting_requests).await;
        if items.is_empty() {
            // idle: wait for a submit, or re-check the flag on timeout
            let _ = timeout_await_notifier(notifier).await;
            continue;
        }

        debug!(model = %predictor.model_name(), requests = items.len(), "serving requests");
        for item in items {
            let (input, sender) = item.into_parts();
            let result = predictor.predict(input);
            if sender.send(result).is_err() {
                warn!(model = %predictor.model_name(), "requester dropped before the response was sent");
            }
        }
    }
}

#[inline]
async fn timeout_await_notifier(notifier: &Notify) -> std::result::Result<(), Elapsed> {
    tokio::time::timeout(Duration::from_millis(100), notifier.notified()).await
}

async fn drain_possible_requests<T>(batch_size: usize, waiting_requests: &Mutex<Vec<T>>) -> Vec<T> {
    let mut requests = waiting_requests.lock().await;
    let take = batch_size.min(requests.len());
    requests.drain(0..take).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_takes_at_most_batch_size() {
        let queue = Mutex::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(drain_possible_requests(2, &queue).await, vec![1, 2]);
        assert_eq!(drain_possible_requests(10, &queue).await, vec![3, 4, 5]);
        assert!(drain_possible_requests(10, &queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_with_zero_batch_size_takes_nothing() {
        let queue = Mutex::new(vec![1]);
        assert!(drain_possible_requests(0, &queue).await.is_empty());
        assert_eq!(queue.lock().await.len(), 1);
    }

    #[cfg(feature = "candle")]
    mod candle {
        use super::*;
        use crate::backend::candle::CandleBackend;
        use crate::engine::{Engine, EngineOptions};
        use crate::error::Error;
        use crate::inference::{Model, Translator, TranslatorContext};
        use crate::ndarray::NDList;
        use crate::types::{DataType, Shape};

        struct Doubler;

        impl Translator<CandleBackend, f32, f32> for Doubler {
            fn process_input(&self, ctx: &TranslatorContext<CandleBackend>, input: f32) -> Result<NDList<CandleBackend>> {
                let x = ctx.manager().create(&[input], [1])?;
                x.set_name("x");
                Ok(NDList::from(vec![x]))
            }

            fn process_output(&self, _ctx: &TranslatorContext<CandleBackend>, output: NDList<CandleBackend>) -> Result<f32> {
                let value = output[0].to_scalar::<f32>()?;
                if value < 0.0 {
                    return Err(Error::Translate("negative".to_string()));
                }
                Ok(value)
            }
        }

        fn predictor(engine: &Engine<CandleBackend>) -> Predictor<CandleBackend, f32, f32> {
            let mut model = Model::new("double", engine.system_manager()).unwrap();
            model.add_input("x", Shape::new(vec![1]), DataType::Float32);
            model.set_block(
                |_: &NDList<CandleBackend>, inputs: &NDList<CandleBackend>| -> Result<NDList<CandleBackend>> {
                    Ok(NDList::from(vec![inputs[0].mul(2.0)?]))
                },
            );
            model.initialize().unwrap();
            model.new_predictor(Doubler).unwrap()
        }

        #[tokio::test]
        async fn test_service_answers_every_request() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let service = PredictorService::<f32, f32, 2>::new(predictor(&engine));

            let mut items = vec![];
            for i in 0..5 {
                items.push(service.submit(i as f32).await);
            }
            let results = join_all(items).await;
            let values = results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>();
            assert_eq!(values, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
            assert_eq!(service.pending().await, 0);

            let batch = service.predict_all(vec![1.0, -3.0, 2.5]).await;
            assert_eq!(batch[0].as_ref().unwrap(), &2.0);
            assert!(matches!(batch[1], Err(Error::Translate(_))));
            assert_eq!(batch[2].as_ref().unwrap(), &5.0);
        }

        #[tokio::test]
        async fn test_service_returns_prediction_errors() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let service = PredictorService::<f32, f32, 4>::new(predictor(&engine));
            let failed = service.submit(-1.0).await.await;
            assert!(matches!(failed, Err(Error::Translate(_))));
            assert_eq!(service.submit(1.5).await.await.unwrap(), 3.0);
        }

        #[tokio::test]
        async fn test_shutdown_waits_for_predictor_close() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let predictor = predictor(&engine);
            let manager = predictor.manager().clone();
            let service = PredictorService::<f32, f32, 1>::new(predictor);
            assert!(service.is_running());
            assert_eq!(service.submit(2.0).await.await.unwrap(), 4.0);

            service.shutdown().await;
            assert!(!manager.is_open());
        }

        #[tokio::test]
        async fn test_queued_requests_fail_after_shutdown() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let service = PredictorService::<f32, f32, 1>::new(predictor(&engine));
            service.stop();
            tokio::time::sleep(Duration::from_millis(50)).await;

            let late = service.submit(1.0).await;
            service.shutdown().await;
            assert!(matches!(late.await, Err(Error::IllegalState(_))));
        }

        #[test]
        fn test_drop_after_runtime_shutdown() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let predictor = predictor(&engine);
            let manager = predictor.manager().clone();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let service = runtime.block_on(async { PredictorService::<f32, f32, 1>::new(predictor) });

            drop(runtime);
            assert!(!manager.is_open());
            drop(service);
        }

        #[tokio::test]
        async fn test_dropped_service_closes_predictor() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let predictor = predictor(&engine);
            let manager = predictor.manager().clone();
            {
                let service = PredictorService::<f32, f32, 1>::new(predictor);
                assert_eq!(service.submit(1.0).await.await.unwrap(), 2.0);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(!manager.is_open());
        }
    }
}

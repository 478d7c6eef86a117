#![cfg(feature = "candle")]

use std::collections::HashMap;
use std::sync::Arc;
use candle_core::{Device as CandleDevice, Tensor};
use robata::backend::candle::CandleBackend;
use robata::{
    DataType, Engine, EngineOptions, Error, Model, NDList, NDListTranslator, PredictionService,
    PredictorService, Result, Shape, Translator, TranslatorContext,
};

fn engine() -> Engine<CandleBackend> {
    Engine::new(CandleBackend, EngineOptions::default())
}

#[test]
fn softmax_through_session() {
    let engine = engine();
    let manager = engine.new_base_manager().unwrap();
    let session = manager.install_session().unwrap();
    let x = manager.placeholder("x", Shape::new(vec![1, -1]), DataType::Float32).unwrap();
    session.declare_output("y", &x.softmax(-1, 1.0).unwrap()).unwrap();

    let input = Tensor::new(&[[1.0f32, 2.0, 3.0]], &CandleDevice::Cpu).unwrap();
    let outputs = session.evaluate(HashMap::from([("x".to_string(), input)]), &["y"]).unwrap();
    let y = outputs["y"].flatten_all().unwrap().to_vec1::<f32>().unwrap();
    assert_eq!(outputs["y"].dims(), &[1, 3]);
    assert!((y.iter().sum::<f32>() - 1.0).abs() < 1e-6);
}

#[test]
fn arithmetic_on_factories() {
    let engine = engine();
    let manager = engine.new_base_manager().unwrap();
    let threes = manager.full([2, 2], 3.0, DataType::Float32, None).unwrap();
    let fives = manager.full([2, 2], 5.0, DataType::Float32, None).unwrap();
    let sum = threes.add(&fives).unwrap();
    assert_eq!(sum.to_vec::<f32>().unwrap(), vec![8.0; 4]);
    assert_eq!(sum.sum().unwrap().to_scalar::<f32>().unwrap(), 32.0);
    manager.close();
}

#[test]
fn closing_releases_arrays() {
    let engine = engine();
    let manager = engine.new_base_manager().unwrap();
    let child = manager.new_sub_manager().unwrap();
    let array = child.ones([3], DataType::Float32, None).unwrap();

    manager.close();
    manager.close();
    assert!(!child.is_open());
    assert!(array.is_closed());
    assert!(matches!(array.to_vec::<f32>(), Err(Error::IllegalState(_))));
    assert!(matches!(child.zeros([1], DataType::Float32, None), Err(Error::IllegalState(_))));
    assert_eq!(engine.live_managers(), 0);
}

#[test]
fn sibling_managers_across_threads() {
    let engine = Arc::new(engine());
    let handles = (0..8)
        .map(|i| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                let manager = engine.new_base_manager().unwrap();
                let array = manager.full([4], i as f64, DataType::Float32, None).unwrap();
                let total = array.sum().unwrap().to_scalar::<f32>().unwrap();
                manager.close();
                total
            })
        })
        .collect::<Vec<_>>();
    let totals = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
    assert_eq!(totals, (0..8).map(|i| 4.0 * i as f32).collect::<Vec<_>>());
    assert_eq!(engine.live_managers(), 0);
}

struct Linear;

impl Translator<CandleBackend, Vec<f32>, Vec<f32>> for Linear {
    fn process_input(&self, ctx: &TranslatorContext<CandleBackend>, input: Vec<f32>) -> Result<NDList<CandleBackend>> {
        let x = ctx.manager().create(&input, [1, 2])?;
        x.set_name("x");
        Ok(NDList::from(vec![x]))
    }

    fn process_output(&self, _ctx: &TranslatorContext<CandleBackend>, output: NDList<CandleBackend>) -> Result<Vec<f32>> {
        output[0].to_vec::<f32>()
    }
}

fn linear_model(engine: &Engine<CandleBackend>) -> Model<CandleBackend> {
    let mut model = Model::new("linear", engine.system_manager()).unwrap();
    model.add_input("x", Shape::new(vec![1, 2]), DataType::Float32);
    model.set_block(|params: &NDList<CandleBackend>, inputs: &NDList<CandleBackend>| -> Result<NDList<CandleBackend>> {
        let weight = params
            .get_by_name("weight")
            .ok_or_else(|| Error::InvalidArgument("weight".to_string()))?;
        Ok(NDList::from(vec![inputs[0].dot(weight)?]))
    });
    model
}

#[tokio::test]
async fn load_predict_and_serve() {
    let engine = engine();
    let dir = std::env::temp_dir().join(format!("robata-linear-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let weight = Tensor::new(&[[1.0f32, 0.0], [0.0, 2.0]], &CandleDevice::Cpu).unwrap();
    candle_core::safetensors::save(&HashMap::from([("weight".to_string(), weight)]), dir.join("linear.safetensors"))
        .unwrap();

    let mut model = linear_model(&engine);
    model.load(&dir).unwrap();
    assert_eq!(model.data_type(), DataType::Float32);
    assert_eq!(model.describe_output(), vec![("output".to_string(), Shape::new(vec![1, 2]))]);

    let predictor = model.new_predictor(Linear).unwrap();
    assert_eq!(predictor.predict(vec![3.0, 4.0]).unwrap(), vec![3.0, 8.0]);

    let raw = model.new_predictor(NDListTranslator).unwrap();
    let x = engine.system_manager().create(&[1.0f32, 1.0], [1, 2]).unwrap();
    x.set_name("x");
    let out = raw.predict(NDList::from(vec![x])).unwrap();
    assert_eq!(out.get_by_name("output").unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0]);

    let service = PredictorService::<Vec<f32>, Vec<f32>, 4>::new(predictor);
    let served = service.submit(vec![1.0, -1.0]).await.await.unwrap();
    assert_eq!(served, vec![1.0, -2.0]);

    drop(service);
    model.close();
    assert!(out[0].is_closed());
    std::fs::remove_dir_all(&dir).unwrap();
}

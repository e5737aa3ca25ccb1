use crate::model::artifact::{Hyperparameters, Method, ModelName};

#[test]
fn test_bdt_hyperparameters() {
    let hp = Hyperparameters::parse(Method::Bdt, "300_10_1_0.01").unwrap();
    assert_eq!(hp.raw(), "300_10_1_0.01");
    assert_eq!(hp.tag(), "300_10_1_001");
    assert!(Hyperparameters::parse(Method::Bdt, "300_10_1").is_err());
    assert!(Hyperparameters::parse(Method::Bdt, "300_10_x_0.1").is_err());
    assert!(Hyperparameters::parse(Method::Bdt, "300__1_0.1").is_err());
}

#[test]
fn test_dnn_hyperparameters_accept_three_or_four_layers() {
    let four = Hyperparameters::parse(Method::Dnn, "416_160_416_480_0.0001_100_128").unwrap();
    assert_eq!(four.tag(), "416_160_416_480_00001_100_128");
    let three = Hyperparameters::parse(Method::Dnn, "64_32_16_0.001_50_256").unwrap();
    assert_eq!(three.tag(), "64_32_16_0001_50_256");
    assert!(Hyperparameters::parse(Method::Dnn, "300_10_1_0.01").is_err());
}

#[test]
fn test_model_file_names() {
    let name = ModelName {
        channel: "ee".to_string(),
        k_folds: 5,
        method: Method::Dnn,
        hyperparameters: Hyperparameters::parse(Method::Dnn, "64_32_16_0.001_50_256").unwrap(),
        tag: "stops".to_string(),
    };
    assert_eq!(name.stem(1), "ee_5fold_DNN1_64_32_16_0001_50_256_stops");
    assert_eq!(
        name.file_name(5),
        "ee_5fold_DNN5_64_32_16_0001_50_256_stops.model.json"
    );
}

#[test]
fn test_method_serde_names() {
    assert_eq!(serde_json::to_string(&Method::Bdt).unwrap(), "\"BDT\"");
    let m: Method = serde_json::from_str("\"DNN\"").unwrap();
    assert_eq!(m, Method::Dnn);
    assert_eq!(Method::Bdt.to_string(), "BDT");
}

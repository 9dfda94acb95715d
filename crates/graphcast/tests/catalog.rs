mod common;

use graphcast::{
    Backend, CapabilityOracle, CatalogError, DType, Graph, GraphPass, InsertConversionPass,
    KernelCatalog, OpId, TypeSet,
};

use common::{context, declare, schemas};

const CATALOG_JSON: &str = r#"
{
  "default_backend": "cpu",
  "kernels": [
    { "op_type": "Relu", "backend": "cpu", "inputs": [["f32", "f64"]] },
    { "op_type": "Relu", "backend": "cuda", "inputs": [["f16", "f32"]] },
    { "op_type": "ComplexMul", "domain": "com.microsoft", "backend": "cuda", "inputs": [["f32"], ["f32"]] }
  ],
  "conversions": [
    { "backend": "cpu", "from": ["f16", "f32", "f64"], "to": ["f16", "f32", "f64"] }
  ]
}
"#;

#[test]
fn loads_kernel_table_from_json() -> anyhow::Result<()> {
    let catalog = KernelCatalog::from_json(CATALOG_JSON)?;
    assert_eq!(catalog.default_backend(), Backend::cpu());

    let relu = OpId::onnx("Relu");
    assert_eq!(
        catalog.backends_for(&relu),
        vec![Backend::cpu(), Backend::cuda()]
    );
    assert_eq!(
        catalog.supported_types(&relu, &Backend::cuda(), 0),
        TypeSet::of(&[DType::F16, DType::F32])
    );

    let complex = OpId::new("ComplexMul", "com.microsoft");
    assert!(catalog.is_known(&complex));
    assert!(!catalog.is_known(&OpId::onnx("ComplexMul")));
    assert!(catalog.can_convert(DType::F64, DType::F16, &Backend::cpu()));
    assert!(!catalog.can_convert(DType::F16, DType::F32, &Backend::cuda()));

    let reloaded = KernelCatalog::from_json(&catalog.to_json()?)?;
    assert_eq!(reloaded, catalog);
    Ok(())
}

#[test]
fn rejects_rows_that_accept_nothing() {
    let json = r#"{
        "default_backend": "cpu",
        "kernels": [{ "op_type": "Relu", "backend": "cpu", "inputs": [[]] }]
    }"#;
    let err = KernelCatalog::from_json(json).unwrap_err();
    assert!(matches!(err, CatalogError::EmptyInput { input: 0, .. }), "{err}");

    let err = KernelCatalog::from_json(r#"{ "default_backend": "cpu", "kernels": 3 }"#)
        .unwrap_err();
    assert!(matches!(err, CatalogError::Json(_)));

    let json = r#"{
        "default_backend": "cpu",
        "kernels": [{ "op_type": "Relu", "backend": "cpu", "inputs": [["f17"]] }]
    }"#;
    let err = KernelCatalog::from_json(json).unwrap_err();
    assert!(matches!(err, CatalogError::Json(_)));
}

#[test]
fn json_catalog_drives_insertion() -> anyhow::Result<()> {
    let catalog = KernelCatalog::from_json(CATALOG_JSON)?;
    let schemas = schemas();
    let mut graph = Graph::new("json_driven");
    declare(&mut graph, "x", DType::F16, &[4]);
    graph.add_node("relu", OpId::onnx("Relu"), &["x"], &["y"])?;
    graph.add_node("tail", OpId::onnx("Relu"), &["y"], &["z"])?;
    graph.add_output("z")?;
    graph.resolve(&schemas)?;

    InsertConversionPass.run(&mut graph, &mut context(&catalog, &schemas))?;
    let relu = graph.node_by_name("relu").unwrap();
    assert_eq!(graph.value_name(relu.inputs[0]), "x_to_f32");
    assert!(graph.node_by_name("z_f32_cast_f16").is_some());
    Ok(())
}

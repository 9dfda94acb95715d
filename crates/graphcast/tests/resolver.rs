mod common;

use graphcast::{Backend, DType, Graph, GraphError, OpId, Resolver, Shape};

use common::{catalog, declare, schemas, three_node_graph};

#[test]
fn resolve_is_idempotent() -> anyhow::Result<()> {
    common::init_tracing();
    let schemas = schemas();
    let mut graph = three_node_graph(false);
    graph.resolve(&schemas)?;
    let first = graph.clone();
    graph.resolve(&schemas)?;
    assert_eq!(graph, first);
    assert!(graph.is_resolved());

    let order: Vec<&str> = graph
        .topological_order()
        .unwrap()
        .iter()
        .map(|id| graph.node(*id).unwrap().name.as_str())
        .collect();
    assert_eq!(order, vec!["node1", "node2", "node3"]);
    Ok(())
}

#[test]
fn infers_implicit_graph_boundary_and_shapes() -> anyhow::Result<()> {
    let mut graph = three_node_graph(false);
    graph.resolve(&schemas())?;

    let names = |ids: &[graphcast::ValueId]| -> Vec<String> {
        ids.iter().map(|id| graph.value_name(*id).to_string()).collect()
    };
    assert_eq!(names(graph.graph_inputs()), vec!["I1", "I2", "I3"]);
    assert_eq!(names(graph.graph_outputs()), vec!["O3"]);

    let o2 = graph.value_by_name("O2").unwrap();
    assert_eq!(o2.dtype, Some(DType::F16));
    assert_eq!(o2.shape, Some(Shape::from_static(&[2, 5])));
    Ok(())
}

#[test]
fn insertion_order_breaks_ties() -> anyhow::Result<()> {
    let mut graph = Graph::new("ties");
    declare(&mut graph, "x", DType::F32, &[3]);
    graph.add_node("late", OpId::onnx("Relu"), &["a"], &["b"])?;
    graph.add_node("early", OpId::onnx("Abs"), &["x"], &["a"])?;
    graph.add_node("side", OpId::onnx("Neg"), &["x"], &["c"])?;
    graph.resolve(&schemas())?;

    let order: Vec<&str> = graph
        .topological_order()
        .unwrap()
        .iter()
        .map(|id| graph.node(*id).unwrap().name.as_str())
        .collect();
    assert_eq!(order, vec!["early", "late", "side"]);
    Ok(())
}

#[test]
fn reports_the_shortest_cycle() {
    let mut graph = Graph::new("loops");
    declare(&mut graph, "x", DType::F32, &[3]);
    graph.add_node("n0", OpId::onnx("Relu"), &["x"], &["a"]).unwrap();
    graph.add_node("n1", OpId::onnx("Add"), &["a", "d"], &["b"]).unwrap();
    graph.add_node("n2", OpId::onnx("Relu"), &["b"], &["c"]).unwrap();
    graph.add_node("n3", OpId::onnx("Relu"), &["c"], &["d"]).unwrap();
    graph.add_node("n4", OpId::onnx("Add"), &["c", "g"], &["f"]).unwrap();
    graph.add_node("n5", OpId::onnx("Relu"), &["f"], &["g"]).unwrap();

    let err = graph.resolve(&schemas()).unwrap_err();
    assert_eq!(
        err,
        GraphError::Cycle {
            graph: "loops".to_string(),
            cycle: vec!["n4".to_string(), "n5".to_string()],
        }
    );
    assert!(!graph.is_resolved());
}

#[test]
fn mixed_operand_types_fail_inference() {
    let mut graph = Graph::new("mixed");
    declare(&mut graph, "a", DType::F16, &[2]);
    declare(&mut graph, "b", DType::F32, &[2]);
    graph.add_node("sum", OpId::onnx("Add"), &["a", "b"], &["c"]).unwrap();

    match graph.resolve(&schemas()).unwrap_err() {
        GraphError::TypeInference { node, reason, .. } => {
            assert_eq!(node, "sum");
            assert!(reason.contains("f16 vs f32"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(graph.value_by_name("c").unwrap().dtype, None);
}

#[test]
fn declared_output_type_must_match_inference() {
    let mut graph = Graph::new("conflict");
    declare(&mut graph, "x", DType::F32, &[2]);
    graph.declare_value("y", Some(DType::F16), None);
    graph.add_node("relu", OpId::onnx("Relu"), &["x"], &["y"]).unwrap();

    let err = graph.resolve(&schemas()).unwrap_err();
    assert!(
        matches!(err, GraphError::TypeInference { value: Some(ref v), .. } if v == "y"),
        "{err}"
    );
}

#[test]
fn unproduced_values_outside_the_declared_inputs_are_undefined() {
    let mut graph = Graph::new("undefined");
    graph.add_input("x", DType::F32, None).unwrap();
    graph.add_node("sum", OpId::onnx("Add"), &["x", "y"], &["z"]).unwrap();

    let err = graph.resolve(&schemas()).unwrap_err();
    assert_eq!(
        err,
        GraphError::UndefinedValue {
            node: "sum".to_string(),
            value: "y".to_string(),
        }
    );
}

#[test]
fn declared_outputs_must_be_produced() {
    let mut graph = Graph::new("missing_output");
    declare(&mut graph, "x", DType::F32, &[2]);
    graph.add_node("relu", OpId::onnx("Relu"), &["x"], &["y"]).unwrap();
    graph.add_output("nowhere").unwrap();

    let err = graph.resolve(&schemas()).unwrap_err();
    assert_eq!(
        err,
        GraphError::UndefinedOutput {
            value: "nowhere".to_string()
        }
    );
}

#[test]
fn oracle_rejects_unknown_operators() {
    let schemas = schemas();
    let catalog = catalog();
    let mut graph = Graph::new("unknown_op");
    declare(&mut graph, "x", DType::F32, &[2]);
    graph.declare_value("y", Some(DType::F32), None);
    let node = graph
        .add_node("gelu", OpId::new("Gelu", "ai.vendor"), &["x"], &["y"])
        .unwrap();
    graph.set_backend(node, Some(Backend::cpu())).unwrap();

    graph.resolve(&schemas).expect("declared types are enough without an oracle");
    let err = Resolver::new(&schemas)
        .with_oracle(&catalog)
        .resolve(&mut graph)
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::UnsupportedOperator {
            node: "gelu".to_string(),
            op: "ai.vendor::Gelu".to_string(),
            backend: None,
        }
    );
    assert!(!graph.is_resolved());
}

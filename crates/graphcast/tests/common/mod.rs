#![allow(dead_code)]

use graphcast::{
    Backend, DType, Graph, KernelCatalog, NodeId, OpId, OptimizeConfig, OptimizeContext,
    SchemaSet, Shape, TypeSet,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Kernel table where cpu lacks half-precision math kernels and cuda has them.
pub fn catalog() -> KernelCatalog {
    let cpu_math = TypeSet::of(&[DType::F32, DType::F64]);
    let cuda_math = TypeSet::of(&[DType::F16, DType::F32]);
    let floats = TypeSet::floats();
    let mut catalog = KernelCatalog::new(Backend::cpu());
    for op in ["MatMul", "Clip", "Relu", "Add"] {
        catalog = catalog
            .with_kernel(OpId::onnx(op), Backend::cpu(), &[cpu_math])
            .with_kernel(OpId::onnx(op), Backend::cuda(), &[cuda_math]);
    }
    for op in ["Transpose", "Abs", "Identity"] {
        catalog = catalog
            .with_kernel(OpId::onnx(op), Backend::cpu(), &[floats])
            .with_kernel(OpId::onnx(op), Backend::cuda(), &[cuda_math]);
    }
    catalog
        .with_kernel(
            OpId::onnx("Inverse"),
            Backend::cpu(),
            &[TypeSet::of(&[DType::F64])],
        )
        .with_conversion(Backend::cpu(), floats, floats)
        .with_conversion(Backend::cuda(), cuda_math, cuda_math)
}

pub fn schemas() -> SchemaSet {
    SchemaSet::with_defaults()
}

pub fn context<'a>(catalog: &'a KernelCatalog, schemas: &'a SchemaSet) -> OptimizeContext<'a> {
    OptimizeContext::new(catalog, schemas, OptimizeConfig::default())
}

pub fn declare(graph: &mut Graph, name: &str, dtype: DType, dims: &[usize]) {
    graph.declare_value(name, Some(dtype), Some(Shape::from_static(dims)));
}

pub fn node_id(graph: &Graph, name: &str) -> NodeId {
    graph
        .node_by_name(name)
        .unwrap_or_else(|| panic!("node `{name}` missing"))
        .id
}

pub fn count_casts(graph: &Graph) -> usize {
    graph.nodes().filter(|n| n.is_cast()).count()
}

/// `I1, I2 -> MatMul -> O1`, `O1, I3 -> MatMul -> O2`, `O2 -> Clip -> O3`, all f16.
///
/// `node2` runs on cuda when `cuda_middle` is set; every other node keeps the default backend.
pub fn three_node_graph(cuda_middle: bool) -> Graph {
    let mut graph = Graph::new("three_node");
    declare(&mut graph, "I1", DType::F16, &[2, 3]);
    declare(&mut graph, "I2", DType::F16, &[3, 4]);
    declare(&mut graph, "I3", DType::F16, &[4, 5]);
    for name in ["O1", "O2", "O3"] {
        graph.declare_value(name, Some(DType::F16), None);
    }
    graph
        .add_node("node1", OpId::onnx("MatMul"), &["I1", "I2"], &["O1"])
        .unwrap();
    let node2 = graph
        .add_node("node2", OpId::onnx("MatMul"), &["O1", "I3"], &["O2"])
        .unwrap();
    graph
        .add_node("node3", OpId::onnx("Clip"), &["O2"], &["O3"])
        .unwrap();
    if cuda_middle {
        graph.set_backend(node2, Some(Backend::cuda())).unwrap();
    }
    graph
}

/// `X(f32) -> Cast(f16) -> Cast(f32) -> Cast(f16) -> Transpose -> Cast(f32)`.
pub fn cast_chain_graph() -> Graph {
    let mut graph = Graph::new("cast_chain");
    declare(&mut graph, "X", DType::F32, &[2, 3]);
    add_cast(&mut graph, "c1", "X", "a", DType::F16);
    add_cast(&mut graph, "c2", "a", "b", DType::F32);
    add_cast(&mut graph, "c3", "b", "c", DType::F16);
    graph
        .add_node("transpose", OpId::onnx("Transpose"), &["c"], &["d"])
        .unwrap();
    add_cast(&mut graph, "c4", "d", "Y", DType::F32);
    graph
}

pub fn add_cast(graph: &mut Graph, name: &str, input: &str, output: &str, to: DType) -> NodeId {
    let id = graph
        .add_node(name, OpId::cast(), &[input], &[output])
        .unwrap();
    graph
        .set_attribute(id, "to", graphcast::Attribute::DType(to))
        .unwrap();
    id
}

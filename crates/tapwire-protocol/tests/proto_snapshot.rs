use prost_reflect::DescriptorPool;

fn pool() -> DescriptorPool {
    DescriptorPool::decode(tapwire_protocol::FILE_DESCRIPTOR_SET).expect("decode descriptor set")
}

#[test]
fn descriptor_set_contains_demo_service() {
    let pool = pool();
    let service = pool
        .get_service_by_name(tapwire_protocol::EXAMPLE_SERVICE)
        .expect("demo service present");
    let methods: Vec<String> = service.methods().map(|m| m.name().to_string()).collect();
    assert_eq!(methods, ["UnaryMethod", "ServerStreamMethod", "BiDiStream"]);
}

#[test]
fn streaming_flags_match_contract() {
    let pool = pool();
    let service = pool
        .get_service_by_name(tapwire_protocol::EXAMPLE_SERVICE)
        .expect("demo service present");
    for method in service.methods() {
        let expected = match method.name() {
            "UnaryMethod" => (false, false),
            "ServerStreamMethod" => (false, true),
            "BiDiStream" => (true, true),
            other => panic!("unexpected method {other}"),
        };
        assert_eq!(
            (method.is_client_streaming(), method.is_server_streaming()),
            expected,
            "streaming flags changed for {}",
            method.name()
        );
    }
}

#[test]
fn override_targets_resolve_in_pool() {
    let pool = pool();
    for (name, target) in tapwire_protocol::type_name_overrides() {
        let full = format!("example.{target}");
        assert!(
            pool.get_message_by_name(&full).is_some(),
            "override {name} points at missing type {full}"
        );
    }
}

use mgmt_controller::global::{ModelOnlyAddHandler, ModelOnlyRemoveHandler};
use mgmt_controller::operation::{failure_description, is_success};
use mgmt_controller::{
    step_fn, AttributeDefinition, ControllerBuilder, ControllerClient, ManagedController, ModelType,
    OperationBuilder, PathAddress, PathElement, Resource, Value,
};
use std::sync::Arc;

fn item_attributes() -> Vec<AttributeDefinition> {
    vec![
        AttributeDefinition::new("name", ModelType::String).required(),
        AttributeDefinition::new("value", ModelType::String),
        AttributeDefinition::new("size", ModelType::Int).default_value(1),
        AttributeDefinition::new("owner", ModelType::String).required().min_length(1),
    ]
}

/// Root with `item=*` resources (`name` read-only, `value`/`size`/`owner` read-write,
/// `hits` metric) and an empty `group=*` type.
fn controller() -> (Arc<ManagedController>, ControllerClient) {
    let mut builder = ControllerBuilder::new("globals");
    let root = builder.registration_mut();
    let item = root
        .register_sub_model(PathElement::wildcard("item"), "An item")
        .unwrap();
    let mut attributes = item_attributes().into_iter();
    if let Some(name) = attributes.next() {
        item.register_read_only_attribute(name).unwrap();
    }
    for attribute in attributes {
        item.register_read_write_attribute(attribute, None).unwrap();
    }
    item.register_metric(
        AttributeDefinition::new("hits", ModelType::Int),
        step_fn(|ctx, _| {
            *ctx.result_mut() = Value::from(42);
            Ok(())
        }),
    )
    .unwrap();
    let add = ModelOnlyAddHandler::new(item_attributes());
    item.register_operation_handler(add.definition(), Arc::new(add), false)
        .unwrap();
    item.register_operation_handler(ModelOnlyRemoveHandler::definition(), Arc::new(ModelOnlyRemoveHandler), false)
        .unwrap();
    root.register_sub_model(PathElement::wildcard("group"), "A group")
        .unwrap();

    let item_a = Resource::with_attributes([("name", "A"), ("value", "first"), ("owner", "ops")]);
    let model = Resource::new().with_child(&PathElement::new("item", "a"), item_a);

    let (controller, access) = builder.with_model(model).build().unwrap();
    let client = ControllerClient::new(controller.clone(), access);
    (controller, client)
}

fn item(name: &str) -> PathAddress {
    PathAddress::pairs(&[("item", name)])
}

fn result(response: &Value) -> &Value {
    assert!(is_success(response), "{response}");
    response.get("result").unwrap()
}

#[tokio::test]
async fn test_read_resource_non_recursive() {
    let (_, client) = controller();

    let response = client
        .execute(OperationBuilder::new("read-resource").build())
        .await
        .unwrap();

    let expected: Value = r#"{"item": {"a": null}, "group": null}"#.parse().unwrap();
    assert_eq!(result(&response), &expected);
}

#[tokio::test]
async fn test_read_resource_recursive_with_and_without_defaults() {
    let (_, client) = controller();

    let with_defaults = client
        .execute(
            OperationBuilder::new("read-resource")
                .param("recursive", true)
                .build(),
        )
        .await
        .unwrap();
    let expected: Value = r#"{
        "item": {"a": {"name": "A", "value": "first", "size": 1, "owner": "ops"}},
        "group": null
    }"#
    .parse()
    .unwrap();
    assert_eq!(result(&with_defaults), &expected);

    let without = client
        .execute(
            OperationBuilder::new("read-resource")
                .address(&item("a"))
                .param("include-defaults", false)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(result(&without).get("size"), Some(&Value::Undefined));
    assert_eq!(result(&without).get("hits"), None);
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let (_, client) = controller();
    let read = OperationBuilder::new("read-resource")
        .param("recursive", true)
        .build();

    let first = client.execute(read.clone()).await.unwrap();
    let second = client.execute(read).await.unwrap();

    assert_eq!(first.to_string(), second.to_string());
}

#[tokio::test]
async fn test_read_attribute_value_default_and_metric() {
    let (_, client) = controller();
    let read = |name: &str| {
        OperationBuilder::new("read-attribute")
            .address(&item("a"))
            .param("name", name)
            .build()
    };

    assert_eq!(result(&client.execute(read("value")).await.unwrap()), &Value::from("first"));
    assert_eq!(result(&client.execute(read("size")).await.unwrap()), &Value::from(1));
    assert_eq!(result(&client.execute(read("hits")).await.unwrap()), &Value::from(42));

    let unknown = client.execute(read("colour")).await.unwrap();
    assert!(failure_description(&unknown).unwrap().contains("colour"));
}

#[tokio::test]
async fn test_children_and_operation_listings() {
    let (_, client) = controller();

    let names = client
        .execute(
            OperationBuilder::new("read-children-names")
                .param("child-type", "item")
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(result(&names), &Value::from(vec![Value::from("a")]));

    let types = client
        .execute(OperationBuilder::new("read-children-types").build())
        .await
        .unwrap();
    assert_eq!(
        result(&types),
        &Value::from(vec![Value::from("item"), Value::from("group")])
    );

    let unknown_type = client
        .execute(
            OperationBuilder::new("read-children-names")
                .param("child-type", "nothing")
                .build(),
        )
        .await
        .unwrap();
    assert!(!is_success(&unknown_type));

    let operations = client
        .execute(
            OperationBuilder::new("read-operation-names")
                .address(&item("a"))
                .build(),
        )
        .await
        .unwrap();
    let operations: Vec<String> = result(&operations)
        .as_list()
        .unwrap()
        .iter()
        .map(Value::to_plain_string)
        .collect();
    assert_eq!(&operations[..2], &["add".to_string(), "remove".to_string()]);
    assert!(operations.contains(&"composite".to_string()));
    assert!(operations.contains(&"write-attribute".to_string()));
}

#[tokio::test]
async fn test_descriptions() {
    let (_, client) = controller();

    let add = client
        .execute(
            OperationBuilder::new("read-operation-description")
                .address(&item("a"))
                .param("name", "add")
                .build(),
        )
        .await
        .unwrap();
    let add = result(&add);
    assert_eq!(add.get("operation-name"), Some(&Value::from("add")));
    assert_eq!(
        add.get_path(&["request-properties", "owner", "nillable"]),
        Some(&Value::from(false))
    );

    let description = client
        .execute(
            OperationBuilder::new("read-resource-description")
                .param("recursive", true)
                .param("operations", true)
                .build(),
        )
        .await
        .unwrap();
    let description = result(&description);
    let item = description
        .get_path(&["children", "item", "model-description", "*"])
        .unwrap();
    assert_eq!(
        item.get_path(&["attributes", "hits", "access-type"]),
        Some(&Value::from("metric"))
    );
    assert!(item.get_path(&["operations", "add"]).is_some());
    assert!(description.get_path(&["operations", "read-resource"]).is_some());
}

#[tokio::test]
async fn test_write_and_undefine_attribute() {
    let (controller, client) = controller();
    let write = |name: &str, value: Value| {
        OperationBuilder::new("write-attribute")
            .address(&item("a"))
            .param("name", name)
            .param("value", value)
            .build()
    };
    let undefine = |name: &str| {
        OperationBuilder::new("undefine-attribute")
            .address(&item("a"))
            .param("name", name)
            .build()
    };

    assert!(is_success(&client.execute(write("value", "second".into())).await.unwrap()));
    assert!(is_success(&client.execute(undefine("value")).await.unwrap()));
    let stored = controller.model_snapshot();
    let stored = stored.navigate(&item("a")).unwrap();
    assert_eq!(stored.attribute("value"), None);

    let read_only = client.execute(write("name", "B".into())).await.unwrap();
    assert!(failure_description(&read_only).unwrap().contains("not writable"));

    let mistyped = client.execute(write("size", "big".into())).await.unwrap();
    assert!(!is_success(&mistyped));

    let required = client.execute(undefine("owner")).await.unwrap();
    assert!(failure_description(&required).unwrap().contains("not nillable"));

    let too_short = client.execute(write("owner", "".into())).await.unwrap();
    assert!(!is_success(&too_short));
}

#[tokio::test]
async fn test_add_and_remove() {
    let (_, client) = controller();
    let add = OperationBuilder::new("add")
        .address(&item("b"))
        .param("name", "B")
        .param("owner", "dev")
        .build();

    assert!(is_success(&client.execute(add.clone()).await.unwrap()));
    let duplicate = client.execute(add).await.unwrap();
    assert!(failure_description(&duplicate).unwrap().contains("Duplicate"));

    let missing_owner = OperationBuilder::new("add")
        .address(&item("c"))
        .param("name", "C")
        .build();
    assert!(!is_success(&client.execute(missing_owner).await.unwrap()));

    let names = client
        .execute(
            OperationBuilder::new("read-children-names")
                .param("child-type", "item")
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(
        result(&names),
        &Value::from(vec![Value::from("a"), Value::from("b")])
    );

    let remove = OperationBuilder::new("remove").address(&item("b")).build();
    assert!(is_success(&client.execute(remove.clone()).await.unwrap()));
    let again = client.execute(remove).await.unwrap();
    assert!(failure_description(&again).unwrap().contains("does not exist"));
}

#[tokio::test]
async fn test_wildcard_addresses_are_rejected() {
    let (controller, client) = controller();
    let add_wildcard = OperationBuilder::new("add")
        .address(&item("*"))
        .param("name", "Star")
        .param("owner", "dev")
        .build();

    let direct = client.execute(add_wildcard.clone()).await.unwrap();
    let failure = failure_description(&direct).unwrap();
    assert!(failure.contains("wildcard"), "{failure}");

    let composite = OperationBuilder::new("composite")
        .param("steps", vec![add_wildcard.clone()])
        .build();
    let failure = failure_description(&client.execute(composite).await.unwrap()).unwrap();
    assert!(failure.contains("step-1"), "{failure}");

    let validate = OperationBuilder::new("validate-operation")
        .param("value", add_wildcard)
        .build();
    assert!(!is_success(&client.execute(validate).await.unwrap()));

    assert_eq!(controller.model_version(), 0);
    assert_eq!(controller.model_snapshot().children_names("item"), vec!["a"]);
}

#[tokio::test]
async fn test_composite_runs_all_steps_in_one_transaction() {
    let (controller, client) = controller();
    let composite = OperationBuilder::new("composite")
        .param(
            "steps",
            vec![
                OperationBuilder::new("write-attribute")
                    .address(&item("a"))
                    .param("name", "value")
                    .param("value", "composite")
                    .build(),
                OperationBuilder::new("add")
                    .address(&item("b"))
                    .param("name", "B")
                    .param("owner", "dev")
                    .build(),
                OperationBuilder::new("read-attribute")
                    .address(&item("a"))
                    .param("name", "value")
                    .build(),
            ],
        )
        .build();

    let response = client.execute(composite).await.unwrap();

    let steps = result(&response);
    assert_eq!(
        steps.get_path(&["step-1", "outcome"]),
        Some(&Value::from("success"))
    );
    assert_eq!(
        steps.get_path(&["step-3", "result"]),
        Some(&Value::from("composite"))
    );
    assert_eq!(controller.model_version(), 1);
    assert!(controller.model_snapshot().navigate(&item("b")).is_some());
}

#[tokio::test]
async fn test_composite_failure_rolls_back_every_step() {
    let (controller, client) = controller();
    let before = controller.model_snapshot();
    let composite = OperationBuilder::new("composite")
        .param(
            "steps",
            vec![
                OperationBuilder::new("write-attribute")
                    .address(&item("a"))
                    .param("name", "value")
                    .param("value", "doomed")
                    .build(),
                OperationBuilder::new("remove").address(&item("zzz")).build(),
            ],
        )
        .build();

    let response = client.execute(composite).await.unwrap();

    assert!(!is_success(&response));
    assert_eq!(response.get("rolled-back"), Some(&Value::from(true)));
    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("step-2"), "{failure}");
    assert!(!failure.contains("step-1"), "{failure}");
    assert_eq!(
        response.get_path(&["result", "step-1", "rolled-back"]),
        Some(&Value::from(true))
    );
    assert_eq!(*controller.model_snapshot(), *before);
}

#[tokio::test]
async fn test_composite_with_invalid_step_runs_nothing() {
    let (controller, client) = controller();
    let composite = OperationBuilder::new("composite")
        .param(
            "steps",
            vec![
                OperationBuilder::new("write-attribute")
                    .address(&item("a"))
                    .param("name", "value")
                    .param("value", "never")
                    .build(),
                OperationBuilder::new("no-such-op").address(&item("a")).build(),
            ],
        )
        .build();

    let response = client.execute(composite).await.unwrap();

    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("step-2"), "{failure}");
    assert_eq!(controller.model_version(), 0);
}

#[tokio::test]
async fn test_validate_operation() {
    let (controller, client) = controller();
    let validate = |operation: Value| {
        OperationBuilder::new("validate-operation")
            .param("value", operation)
            .build()
    };

    let valid = OperationBuilder::new("add")
        .address(&item("b"))
        .param("name", "B")
        .param("owner", "dev")
        .build();
    assert!(is_success(&client.execute(validate(valid)).await.unwrap()));

    let invalid = OperationBuilder::new("add")
        .address(&item("b"))
        .param("name", "B")
        .build();
    let response = client.execute(validate(invalid)).await.unwrap();
    assert!(failure_description(&response).unwrap().contains("owner"));

    let unknown = OperationBuilder::new("explode").build();
    assert!(!is_success(&client.execute(validate(unknown)).await.unwrap()));

    // Validation never executes anything.
    assert!(controller.model_snapshot().navigate(&item("b")).is_none());
}

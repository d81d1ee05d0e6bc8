//! <https://spec.graphql.org/October2021/#sec-Executing-Operations>

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::JsonMap;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json_bytes::ByteString;

use super::cache_control::CachePolicy;
use super::cache_control::static_field_hint;
use super::input_coercion::coerce_argument_values;
use super::input_coercion::is_included;
use super::resolver::FieldError;
use super::resolver::ResolveInfo;
use super::resolver::default_resolve;
use super::result_coercion::complete_value;
use crate::context::ExecutionContext;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::schema::ExecutableSchema;

/// Marker for a field error propagating up to the nearest nullable field.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropagateNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Fields of a selection set are resolved concurrently.
    Normal,
    /// Top-level fields of a mutation are resolved one after the other.
    Sequential,
}

/// The result of executing an operation.
#[derive(Debug)]
pub(crate) struct ExecutionOutput {
    pub(crate) data: Option<Value>,
    pub(crate) errors: Vec<graphql::Error>,
    pub(crate) cache_policy: CachePolicy,
}

/// The fields of one response key, all selecting the same field of `parent_type`.
#[derive(Clone)]
pub(crate) struct FieldSelection<'a> {
    pub(crate) parent_type: &'a Name,
    pub(crate) fields: Vec<&'a Field>,
}

impl<'a> FieldSelection<'a> {
    pub(crate) fn field(&self) -> &'a Field {
        self.fields[0]
    }

    pub(crate) fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.field().name)
    }

    pub(crate) fn sub_selections(&self) -> Vec<&'a Selection> {
        self.fields
            .iter()
            .flat_map(|field| &field.selection_set.selections)
            .collect()
    }
}

pub(crate) struct ExecutionState<'a> {
    pub(crate) schema: &'a ExecutableSchema,
    pub(crate) document: &'a Valid<ExecutableDocument>,
    pub(crate) variable_values: &'a Valid<JsonMap>,
    context: Arc<ExecutionContext>,
    introspection: JsonMap,
    errors: Mutex<Vec<graphql::Error>>,
    cache_policy: Mutex<CachePolicy>,
}

impl ExecutionState<'_> {
    /// Records a field error at `path`.
    pub(crate) fn field_error(
        &self,
        message: impl Into<String>,
        path: &Path,
        field: &Field,
        extensions: Object,
    ) {
        let located: graphql::Error =
            GraphQLError::new(message, field.name.location(), &self.document.sources).into();
        let mut error = graphql::Error::builder()
            .message(located.message)
            .locations(located.locations)
            .path(path.clone())
            .build();
        error.extensions = extensions;
        self.errors.lock().push(error);
    }
}

/// Executes a validated operation.
///
/// Request errors (the operation cannot start) are returned as `Err`. Field errors are part of
/// the output, next to the partial data.
pub(crate) async fn execute(
    schema: &ExecutableSchema,
    document: &Valid<ExecutableDocument>,
    operation: &Operation,
    variable_values: &Valid<JsonMap>,
    context: Arc<ExecutionContext>,
) -> Result<ExecutionOutput, Vec<graphql::Error>> {
    let request_error = |message: String| {
        vec![
            graphql::Error::builder()
                .message(message)
                .extension_code("OPERATION_RESOLUTION_FAILURE")
                .build(),
        ]
    };
    let mode = match operation.operation_type {
        OperationType::Query => ExecutionMode::Normal,
        OperationType::Mutation => ExecutionMode::Sequential,
        OperationType::Subscription => {
            return Err(request_error(
                "Subscriptions are not supported by this gateway".to_string(),
            ));
        }
    };
    let root_type_name = &operation.selection_set.ty;
    let Some(root_type) = schema.schema().get_object(root_type_name) else {
        let operation_type = match operation.operation_type {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        };
        return Err(request_error(format!(
            "Schema is not configured to execute {operation_type} operation"
        )));
    };

    let mut state = ExecutionState {
        schema,
        document,
        variable_values,
        context,
        introspection: JsonMap::new(),
        errors: Mutex::new(Vec::new()),
        cache_policy: Mutex::new(CachePolicy::default()),
    };

    let root_selections: Vec<&Selection> = operation.selection_set.selections.iter().collect();
    let has_introspection = collect_fields(&state, root_type, &root_selections)
        .iter()
        .any(|selection| matches!(selection.field().name.as_str(), "__schema" | "__type"));
    if has_introspection {
        let schema = schema.schema();
        match apollo_compiler::introspection::partial_execute(
            schema,
            &schema.implementers_map(),
            document,
            operation,
            variable_values,
        ) {
            Ok(response) => {
                state
                    .errors
                    .get_mut()
                    .extend(response.errors.into_iter().map(graphql::Error::from));
                state.introspection = response.data.unwrap_or_default();
            }
            Err(error) => {
                return Err(vec![error.to_graphql_error(&document.sources).into()]);
            }
        }
    }

    let data = execute_selection_set(
        &state,
        Path::empty(),
        mode,
        root_type,
        Arc::new(Object::new()),
        root_selections,
    )
    .await;

    Ok(ExecutionOutput {
        // a null propagating to the root nulls the whole data
        data: Some(data.map(Value::Object).unwrap_or(Value::Null)),
        errors: state.errors.into_inner(),
        cache_policy: state.cache_policy.into_inner(),
    })
}

/// <https://spec.graphql.org/October2021/#ExecuteSelectionSet()>
pub(crate) fn execute_selection_set<'a>(
    state: &'a ExecutionState<'a>,
    path: Path,
    mode: ExecutionMode,
    object_type: &'a ObjectType,
    parent: Arc<Object>,
    selections: Vec<&'a Selection>,
) -> BoxFuture<'a, Result<Object, PropagateNull>> {
    async move {
        let grouped = collect_fields(state, object_type, &selections);
        let is_root = path.is_empty();
        let results = match mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(grouped.len());
                for selection in grouped {
                    let key = selection.field().response_key().clone();
                    let value = execute_field(
                        state,
                        path.clone(),
                        object_type,
                        parent.clone(),
                        selection,
                        is_root,
                    )
                    .await;
                    results.push((key, value));
                }
                results
            }
            ExecutionMode::Normal => {
                join_all(grouped.into_iter().map(|selection| {
                    let key = selection.field().response_key().clone();
                    execute_field(
                        state,
                        path.clone(),
                        object_type,
                        parent.clone(),
                        selection,
                        is_root,
                    )
                    .map(move |value| (key, value))
                }))
                .await
            }
        };

        let mut object = Object::new();
        for (key, value) in results {
            object.insert(ByteString::from(key.as_str()), value?);
        }
        Ok(object)
    }
    .boxed()
}

/// <https://spec.graphql.org/October2021/#CollectFields()>
pub(crate) fn collect_fields<'a>(
    state: &ExecutionState<'a>,
    object_type: &'a ObjectType,
    selections: &[&'a Selection],
) -> Vec<FieldSelection<'a>> {
    let mut grouped = Vec::new();
    let mut visited_fragments = HashSet::new();
    collect_fields_into(
        state,
        object_type,
        selections.iter().copied(),
        &mut visited_fragments,
        &mut grouped,
    );
    grouped
}

fn collect_fields_into<'a>(
    state: &ExecutionState<'a>,
    object_type: &'a ObjectType,
    selections: impl Iterator<Item = &'a Selection>,
    visited_fragments: &mut HashSet<&'a Name>,
    grouped: &mut Vec<FieldSelection<'a>>,
) {
    for selection in selections {
        let directives = match selection {
            Selection::Field(field) => &field.directives,
            Selection::FragmentSpread(spread) => &spread.directives,
            Selection::InlineFragment(inline) => &inline.directives,
        };
        if !is_included(directives, state.variable_values) {
            continue;
        }
        match selection {
            Selection::Field(field) => {
                let field: &'a Field = field;
                let key = field.response_key();
                match grouped
                    .iter_mut()
                    .find(|selection| selection.field().response_key() == key)
                {
                    Some(existing) => existing.fields.push(field),
                    None => grouped.push(FieldSelection {
                        parent_type: &object_type.name,
                        fields: vec![field],
                    }),
                }
            }
            Selection::FragmentSpread(spread) => {
                if !visited_fragments.insert(&spread.fragment_name) {
                    continue;
                }
                let Some(fragment) = state.document.fragments.get(&spread.fragment_name) else {
                    continue;
                };
                if !does_fragment_type_apply(state, object_type, fragment.type_condition()) {
                    continue;
                }
                collect_fields_into(
                    state,
                    object_type,
                    fragment.selection_set.selections.iter(),
                    visited_fragments,
                    grouped,
                );
            }
            Selection::InlineFragment(inline) => {
                if let Some(condition) = &inline.type_condition
                    && !does_fragment_type_apply(state, object_type, condition)
                {
                    continue;
                }
                collect_fields_into(
                    state,
                    object_type,
                    inline.selection_set.selections.iter(),
                    visited_fragments,
                    grouped,
                );
            }
        }
    }
}

/// <https://spec.graphql.org/October2021/#DoesFragmentTypeApply()>
fn does_fragment_type_apply(
    state: &ExecutionState<'_>,
    object_type: &ObjectType,
    type_condition: &Name,
) -> bool {
    if object_type.name == *type_condition {
        return true;
    }
    is_possible_type(state, type_condition, object_type)
}

pub(crate) fn is_possible_type(
    state: &ExecutionState<'_>,
    abstract_type: &Name,
    object_type: &ObjectType,
) -> bool {
    match state.schema.schema().types.get(abstract_type) {
        Some(ExtendedType::Interface(_)) => object_type
            .implements_interfaces
            .iter()
            .any(|implemented| implemented.name == *abstract_type),
        Some(ExtendedType::Union(union_type)) => union_type
            .members
            .iter()
            .any(|member| member.name == object_type.name),
        _ => false,
    }
}

/// <https://spec.graphql.org/October2021/#ExecuteField()>
///
/// Returns the completed value, with field errors already nullified where the field type
/// allows it.
fn execute_field<'a>(
    state: &'a ExecutionState<'a>,
    path: Path,
    object_type: &'a ObjectType,
    parent: Arc<Object>,
    selection: FieldSelection<'a>,
    is_root: bool,
) -> BoxFuture<'a, Result<Value, PropagateNull>> {
    async move {
        let field = selection.field();
        let path = path.join_key(field.response_key().as_str());
        let field_name = field.name.as_str();

        if field_name == "__typename" {
            return Ok(Value::String(ByteString::from(object_type.name.as_str())));
        }
        if is_root && matches!(field_name, "__schema" | "__type") {
            return Ok(state
                .introspection
                .get(field.response_key().as_str())
                .cloned()
                .unwrap_or(Value::Null));
        }

        let Some(field_definition) = object_type.fields.get(&field.name) else {
            state.field_error(
                format!(
                    "Cannot query field \"{field_name}\" on type \"{}\".",
                    object_type.name
                ),
                &path,
                field,
                Object::new(),
            );
            return Err(PropagateNull);
        };
        let ty: &'a Type = &field_definition.ty;

        let resolved = resolve_field_value(
            state,
            &path,
            object_type,
            parent,
            field_definition,
            field,
            is_root,
        )
        .await;
        let completed = match resolved {
            Ok(value) => complete_value(state, path, ty, value, selection).await,
            Err(PropagateNull) => Err(PropagateNull),
        };
        try_nullify(ty, completed)
    }
    .boxed()
}

/// <https://spec.graphql.org/October2021/#ResolveFieldValue()>
async fn resolve_field_value<'a>(
    state: &'a ExecutionState<'a>,
    path: &Path,
    object_type: &'a ObjectType,
    parent: Arc<Object>,
    field_definition: &'a apollo_compiler::schema::FieldDefinition,
    field: &'a Field,
    is_root: bool,
) -> Result<Value, PropagateNull> {
    let static_hint = static_field_hint(state.schema.schema(), field_definition, is_root);

    let Some(resolver) = state.schema.resolver(&object_type.name, &field.name) else {
        state.cache_policy.lock().restrict(static_hint);
        return Ok(default_resolve(&parent, field.name.as_str()));
    };

    let arguments = match coerce_argument_values(
        state.schema.schema(),
        state.variable_values,
        field_definition,
        field,
    ) {
        Ok(arguments) => arguments,
        Err(message) => {
            state.field_error(message, path, field, Object::new());
            return Err(PropagateNull);
        }
    };

    let info = ResolveInfo {
        context: state.context.clone(),
        parent,
        arguments,
        parent_type: object_type.name.clone(),
        field_name: field.name.clone(),
        return_type: field_definition.ty.clone(),
        path: path.clone(),
        cache_hint: Default::default(),
    };
    let dynamic_hint = info.cache_hint.clone();

    let result = AssertUnwindSafe(resolver.resolve(info))
        .catch_unwind()
        .await;

    let hint = match *dynamic_hint.lock() {
        Some(dynamic) => static_hint.replace(dynamic),
        None => static_hint,
    };
    state.cache_policy.lock().restrict(hint);

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(FieldError {
            message,
            extensions,
        })) => {
            state.field_error(message, path, field, extensions);
            Err(PropagateNull)
        }
        Err(_panic) => {
            tracing::error!(
                field = %format!("{}.{}", object_type.name, field.name),
                %path,
                "resolver panicked"
            );
            let mut extensions = Object::new();
            extensions.insert("code", Value::String("INTERNAL_SERVER_ERROR".into()));
            state.field_error("Internal server error", path, field, extensions);
            Err(PropagateNull)
        }
    }
}

/// Try to insert a propagated null if possible, or keep propagating it.
///
/// <https://spec.graphql.org/October2021/#sec-Handling-Field-Errors>
pub(crate) fn try_nullify(
    ty: &Type,
    result: Result<Value, PropagateNull>,
) -> Result<Value, PropagateNull> {
    match result {
        Ok(json) => Ok(json),
        Err(PropagateNull) => {
            if ty.is_non_null() {
                Err(PropagateNull)
            } else {
                Ok(Value::Null)
            }
        }
    }
}

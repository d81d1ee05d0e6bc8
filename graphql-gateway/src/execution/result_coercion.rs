use std::sync::Arc;

use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;

use super::engine::ExecutionMode;
use super::engine::ExecutionState;
use super::engine::FieldSelection;
use super::engine::PropagateNull;
use super::engine::execute_selection_set;
use super::engine::is_possible_type;
use super::engine::try_nullify;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Checks a resolver's value against the field type and executes sub-selections on objects.
///
/// A field error is recorded on `state` and surfaces as `Err(PropagateNull)` so the caller can
/// null the closest nullable position.
pub(crate) fn complete_value<'a>(
    state: &'a ExecutionState<'a>,
    path: Path,
    ty: &'a Type,
    resolved: Value,
    selection: FieldSelection<'a>,
) -> BoxFuture<'a, Result<Value, PropagateNull>> {
    async move {
        let field = selection.field();
        macro_rules! field_error {
            ($($arg: tt)+) => {
                {
                    state.field_error(format!($($arg)+), &path, field, Object::new());
                    return Err(PropagateNull);
                }
            };
        }

        if resolved.is_null() {
            if ty.is_non_null() {
                field_error!(
                    "Cannot return null for non-nullable field {}.",
                    selection.coordinate()
                )
            } else {
                return Ok(Value::Null);
            }
        }

        let ty_name = match ty {
            Type::List(inner_ty) | Type::NonNullList(inner_ty) => {
                let Value::Array(items) = resolved else {
                    field_error!(
                        "Expected Iterable, but did not find one for field \"{}\".",
                        selection.coordinate()
                    )
                };
                let inner_ty: &'a Type = inner_ty;
                let completed = join_all(items.into_iter().enumerate().map(|(index, item)| {
                    let inner_path = path.join_index(index);
                    complete_value(state, inner_path, inner_ty, item, selection.clone())
                        .map(move |result| try_nullify(inner_ty, result))
                }))
                .await;
                // a failed non-null item fails the whole list
                return completed
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array);
            }
            Type::Named(name) | Type::NonNullNamed(name) => name,
        };

        let Some(ty_def) = state.schema.schema().types.get(ty_name) else {
            field_error!("Undefined type {ty_name}")
        };
        let object = match ty_def {
            ExtendedType::InputObject(_) => {
                field_error!("Field with input object type {ty_name}")
            }
            ExtendedType::Enum(_) | ExtendedType::Scalar(_) => {
                if let Some(message) = invalid_leaf(ty_def, &resolved) {
                    field_error!("{message}")
                }
                return Ok(resolved);
            }
            ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_) => {
                match resolved {
                    Value::Object(object) => object,
                    other => field_error!(
                        "Expected a value of type \"{ty_name}\" but received: {other}"
                    ),
                }
            }
        };

        let object_type = match ty_def {
            ExtendedType::Object(def) => def,
            _ => {
                // abstract types are resolved through `__typename`
                let Some(type_name) = object.get("__typename").and_then(Value::as_str) else {
                    field_error!(
                        "Abstract type \"{ty_name}\" must resolve to an Object type at runtime for field \"{}\". \
                         Return an object with a \"__typename\" key.",
                        selection.coordinate()
                    )
                };
                let Some(def) = state.schema.schema().get_object(type_name) else {
                    field_error!(
                        "Abstract type \"{ty_name}\" was resolved to a type \"{type_name}\" that does not exist inside the schema."
                    )
                };
                if !is_possible_type(state, ty_name, def) {
                    field_error!(
                        "Runtime Object type \"{type_name}\" is not a possible type for \"{ty_name}\"."
                    )
                }
                def
            }
        };

        execute_selection_set(
            state,
            path.clone(),
            ExecutionMode::Normal,
            object_type,
            Arc::new(object),
            selection.sub_selections(),
        )
        .await
        .map(Value::Object)
    }
    .boxed()
}

/// The error message for a leaf value its type cannot represent. Values are never coerced
/// between JSON types.
fn invalid_leaf(ty_def: &ExtendedType, resolved: &Value) -> Option<String> {
    let valid = match ty_def {
        ExtendedType::Enum(enum_def) => resolved
            .as_str()
            .is_some_and(|value| enum_def.values.contains_key(value)),
        ExtendedType::Scalar(scalar) => match scalar.name.as_str() {
            "Int" => resolved
                .as_i64()
                .is_some_and(|int| i32::try_from(int).is_ok()),
            "Float" => resolved.is_number(),
            "String" => resolved.is_string(),
            "Boolean" => resolved.is_boolean(),
            "ID" => resolved.is_string() || resolved.is_i64(),
            // custom scalars take any JSON
            _ => true,
        },
        _ => true,
    };
    if valid {
        return None;
    }
    let ty_name = ty_def.name();
    Some(match ty_def {
        ExtendedType::Enum(_) => format!("Enum \"{ty_name}\" cannot represent value: {resolved}"),
        _ if ty_name.as_str() == "Int" && resolved.is_i64() => {
            format!("Int cannot represent non 32-bit signed integer value: {resolved}")
        }
        _ => format!("{ty_name} cannot represent value: {resolved}"),
    })
}

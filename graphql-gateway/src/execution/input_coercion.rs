//! <https://spec.graphql.org/October2021/#sec-Coercing-Field-Arguments>
//!
//! Variables are coerced up front by `apollo_compiler::request::coerce_variable_values`,
//! this converts argument literals of a validated document to JSON with defaults applied.

use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast::Value as AstValue;
use apollo_compiler::executable::Field;
use apollo_compiler::response::JsonMap;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::Type;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

pub(crate) fn coerce_argument_values(
    schema: &Schema,
    variable_values: &JsonMap,
    field_definition: &FieldDefinition,
    field: &Field,
) -> Result<Object, String> {
    let mut coerced = Object::new();
    for argument_definition in &field_definition.arguments {
        let name = argument_definition.name.as_str();
        let provided = field
            .arguments
            .iter()
            .find(|argument| argument.name == argument_definition.name)
            .map(|argument| &argument.value);

        let ty: &Type = &argument_definition.ty;
        let value = match provided.map(|value| &**value) {
            Some(AstValue::Variable(variable)) => variable_values.get(variable.as_str()).cloned(),
            Some(value) => Some(coerce_literal(schema, variable_values, ty, value)?),
            None => None,
        };

        match value {
            Some(value) => {
                if value.is_null() && ty.is_non_null() {
                    return Err(format!(
                        "Argument \"{name}\" of non-null type \"{ty}\" must not be null."
                    ));
                }
                coerced.insert(ByteString::from(name), value);
            }
            None => {
                if let Some(default) = &argument_definition.default_value {
                    let value = coerce_literal(schema, variable_values, ty, default)?;
                    coerced.insert(ByteString::from(name), value);
                } else if ty.is_non_null() {
                    return Err(format!(
                        "Argument \"{name}\" of required type \"{ty}\" was not provided."
                    ));
                }
            }
        }
    }
    Ok(coerced)
}

fn coerce_literal(
    schema: &Schema,
    variable_values: &JsonMap,
    ty: &Type,
    value: &AstValue,
) -> Result<Value, String> {
    match value {
        AstValue::Null => Ok(Value::Null),
        AstValue::Variable(variable) => Ok(variable_values
            .get(variable.as_str())
            .cloned()
            .unwrap_or(Value::Null)),
        AstValue::List(items) => {
            let item_type = match ty {
                Type::List(inner) | Type::NonNullList(inner) => inner.as_ref(),
                // custom scalars accept any list literal
                Type::Named(_) | Type::NonNullNamed(_) => ty,
            };
            items
                .iter()
                .map(|item| coerce_literal(schema, variable_values, item_type, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        _ if ty.is_list() => {
            // a single value where a list is expected is coerced to a list of one
            let item_type = ty.item_type();
            Ok(Value::Array(vec![coerce_literal(
                schema,
                variable_values,
                item_type,
                value,
            )?]))
        }
        AstValue::Object(fields) => {
            let Some(ExtendedType::InputObject(input_object)) =
                schema.types.get(ty.inner_named_type())
            else {
                // custom scalar
                let mut object = Object::new();
                for (name, value) in fields {
                    let value = coerce_literal(schema, variable_values, ty, value)?;
                    object.insert(ByteString::from(name.as_str()), value);
                }
                return Ok(Value::Object(object));
            };
            let mut object = Object::new();
            for (field_name, field_definition) in &input_object.fields {
                let field_type: &Type = &field_definition.ty;
                let provided = fields
                    .iter()
                    .find(|(name, _)| name == field_name)
                    .map(|(_, value)| &**value);
                let value = match provided {
                    Some(value) => match value {
                        AstValue::Variable(variable)
                            if !variable_values.contains_key(variable.as_str()) =>
                        {
                            None
                        }
                        value => Some(coerce_literal(schema, variable_values, field_type, value)?),
                    },
                    None => None,
                };
                let value = match (value, &field_definition.default_value) {
                    (Some(value), _) => Some(value),
                    (None, Some(default)) => {
                        Some(coerce_literal(schema, variable_values, field_type, default)?)
                    }
                    (None, None) if field_type.is_non_null() => {
                        return Err(format!(
                            "Field \"{field_name}\" of required type \"{field_type}\" was not provided."
                        ));
                    }
                    (None, None) => None,
                };
                if let Some(value) = value {
                    object.insert(ByteString::from(field_name.as_str()), value);
                }
            }
            Ok(Value::Object(object))
        }
        AstValue::Enum(name) => Ok(Value::String(ByteString::from(name.as_str()))),
        AstValue::String(string) => Ok(Value::String(ByteString::from(string.as_str()))),
        AstValue::Boolean(boolean) => Ok(Value::Bool(*boolean)),
        AstValue::Int(int) => {
            if ty.inner_named_type().as_str() == "Float" {
                int.try_to_f64()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("Float cannot represent value: {}", int.as_str()))
            } else if let Ok(int) = int.try_to_i32() {
                Ok(Value::from(int))
            } else {
                int.as_str()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("Int cannot represent non 32-bit signed integer value: {}", int.as_str()))
            }
        }
        AstValue::Float(float) => float
            .try_to_f64()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("Float cannot represent value: {}", float.as_str())),
    }
}

/// Evaluates `@skip` and `@include`.
pub(crate) fn is_included(
    directives: &apollo_compiler::executable::DirectiveList,
    variable_values: &JsonMap,
) -> bool {
    let condition = |name: &str| -> Option<bool> {
        let argument: &Node<AstValue> = directives.get(name)?.specified_argument_by_name("if")?;
        match &**argument {
            AstValue::Boolean(value) => Some(*value),
            AstValue::Variable(variable) => variable_values
                .get(variable.as_str())
                .and_then(Value::as_bool),
            _ => None,
        }
    };
    if condition("skip") == Some(true) {
        return false;
    }
    condition("include") != Some(false)
}

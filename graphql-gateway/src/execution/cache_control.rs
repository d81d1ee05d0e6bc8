//! Cache hints and the cache policy of a response.
//!
//! Hints come from `@cacheControl` on fields and on the types they return, and from resolvers
//! through [`ResolveInfo::set_cache_hint`](super::resolver::ResolveInfo::set_cache_hint).
//! The policy of a response is the most restrictive of the hints of every resolved field.

use std::fmt;

use apollo_compiler::Schema;
use apollo_compiler::schema::DirectiveList;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use serde::Deserialize;
use serde::Serialize;

pub(crate) const CACHE_CONTROL_DIRECTIVE: &str = "cacheControl";

/// Declared on behalf of type definitions that use `@cacheControl` without declaring it.
pub(crate) const CACHE_CONTROL_DEFINITIONS: &str = r#"
enum CacheControlScope {
  PUBLIC
  PRIVATE
}

directive @cacheControl(
  maxAge: Int
  scope: CacheControlScope
  inheritMaxAge: Boolean
) on FIELD_DEFINITION | OBJECT | INTERFACE | UNION
"#;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheScope {
    #[default]
    Public,
    Private,
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Public => write!(f, "public"),
            CacheScope::Private => write!(f, "private"),
        }
    }
}

/// A cache hint. Unset members do not constrain the policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheHint {
    /// Seconds.
    pub max_age: Option<u32>,
    pub scope: Option<CacheScope>,
}

impl CacheHint {
    pub fn new(max_age: Option<u32>, scope: Option<CacheScope>) -> Self {
        Self { max_age, scope }
    }

    /// The most restrictive combination of both hints.
    pub(crate) fn restrict(self, other: CacheHint) -> Self {
        let max_age = match (self.max_age, other.max_age) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let scope = match (self.scope, other.scope) {
            (Some(CacheScope::Private), _) | (_, Some(CacheScope::Private)) => {
                Some(CacheScope::Private)
            }
            (a, b) => a.or(b),
        };
        Self { max_age, scope }
    }

    /// `other` wins for every member it sets.
    pub(crate) fn replace(self, other: CacheHint) -> Self {
        Self {
            max_age: other.max_age.or(self.max_age),
            scope: other.scope.or(self.scope),
        }
    }
}

/// The accumulated cache policy of an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachePolicy {
    hint: CacheHint,
}

impl CachePolicy {
    pub(crate) fn restrict(&mut self, hint: CacheHint) {
        self.hint = self.hint.restrict(hint);
    }

    pub fn max_age(&self) -> Option<u32> {
        self.hint.max_age
    }

    pub fn scope(&self) -> CacheScope {
        self.hint.scope.unwrap_or_default()
    }

    /// `Some(max_age)` when the response may be stored in a shared cache.
    pub fn public_max_age(&self) -> Option<u32> {
        match (self.hint.max_age, self.scope()) {
            (Some(max_age), CacheScope::Public) if max_age > 0 => Some(max_age),
            _ => None,
        }
    }

    /// Value of the `cache-control` response header, when the response is cacheable at all.
    pub fn header_value(&self) -> Option<String> {
        match self.hint.max_age {
            Some(max_age) if max_age > 0 => Some(format!("max-age={max_age}, {}", self.scope())),
            _ => None,
        }
    }
}

struct DirectiveHint {
    hint: CacheHint,
    inherit_max_age: bool,
}

fn directive_hint(directives: &DirectiveList) -> Option<DirectiveHint> {
    let directive = directives.get(CACHE_CONTROL_DIRECTIVE)?;
    let max_age = directive
        .specified_argument_by_name("maxAge")
        .and_then(|value| value.to_i32())
        .and_then(|max_age| u32::try_from(max_age).ok());
    let scope = directive
        .specified_argument_by_name("scope")
        .and_then(|value| value.as_enum())
        .and_then(|scope| match scope.as_str() {
            "PUBLIC" => Some(CacheScope::Public),
            "PRIVATE" => Some(CacheScope::Private),
            _ => None,
        });
    let inherit_max_age = directive
        .specified_argument_by_name("inheritMaxAge")
        .and_then(|value| value.to_bool())
        .unwrap_or_default();
    Some(DirectiveHint {
        hint: CacheHint { max_age, scope },
        inherit_max_age,
    })
}

/// The hint of a field before its resolver runs.
///
/// A hint on the returned composite type applies first and a hint on the field overrides it.
/// Without any `maxAge`, root fields and fields returning composite types get `maxAge: 0`
/// unless they declare `inheritMaxAge: true`. Leaf fields inherit from their parent.
pub(crate) fn static_field_hint(
    schema: &Schema,
    field_definition: &FieldDefinition,
    is_root_field: bool,
) -> CacheHint {
    let return_type = schema.types.get(field_definition.ty.inner_named_type());
    let is_composite = matches!(
        return_type,
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
    );

    let mut hint = CacheHint::default();
    let mut inherit_max_age = false;

    if is_composite
        && let Some(type_hint) = return_type.and_then(|ty| directive_hint(ty.directives()))
    {
        hint = type_hint.hint;
    }
    if let Some(field_hint) = directive_hint(&DirectiveList(
        field_definition.directives.iter().cloned().map(Into::into).collect(),
    )) {
        if field_hint.inherit_max_age {
            inherit_max_age = true;
            hint.max_age = None;
            hint = hint.replace(CacheHint::new(None, field_hint.hint.scope));
        } else {
            hint = hint.replace(field_hint.hint);
        }
    }

    if hint.max_age.is_none() && ((is_composite && !inherit_max_age) || is_root_field) {
        hint.max_age = Some(0);
    }
    hint
}

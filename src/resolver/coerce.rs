//! Conversion of host values into WGSL literals and constructor calls.

use anyhow::{Context, Result, anyhow, bail};
use half::f16;
use serde_json::Value;

use super::{
    ctx::ResolutionCtx,
    data::{DataSchema, Scalar},
};

/// Shortest textual form of `value`: plain decimal or exponential, whichever
/// is shorter (decimal on a tie).
pub fn format_number(value: f64) -> String {
    let decimal = format!("{value}");
    let exponential = format!("{value:e}");
    if exponential.len() < decimal.len() {
        exponential
    } else {
        decimal
    }
}

/// A float literal that WGSL reads back as a float (always has `.` or an
/// exponent).
fn float_text(value: f64) -> String {
    let text = format_number(value);
    if text.contains(['.', 'e']) {
        text
    } else {
        format!("{text}.0")
    }
}

fn number(value: &Value, target: &str) -> Result<f64> {
    let n = value
        .as_f64()
        .ok_or_else(|| anyhow!("cannot coerce {value} to {target}: expected a number"))?;
    if !n.is_finite() {
        bail!("cannot coerce {value} to {target}: value is not finite");
    }
    Ok(n)
}

fn integer(value: &Value, target: &str) -> Result<i64> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    let n = number(value, target)?;
    if n.fract() != 0.0 || n.abs() > i64::MAX as f64 {
        bail!("cannot coerce {value} to {target}: expected an integer");
    }
    Ok(n as i64)
}

fn scalar_literal(value: &Value, scalar: Scalar) -> Result<String> {
    let target = scalar.wgsl();
    match scalar {
        Scalar::Bool => value
            .as_bool()
            .map(|b| b.to_string())
            .ok_or_else(|| anyhow!("cannot coerce {value} to bool")),
        Scalar::I32 => {
            let n = integer(value, target)?;
            let n = i32::try_from(n).map_err(|_| anyhow!("{value} is out of range for i32"))?;
            if n == i32::MIN {
                // `2147483648i` alone overflows, so negate an abstract int instead.
                Ok(format!("i32({n})"))
            } else {
                Ok(format!("{n}i"))
            }
        }
        Scalar::U32 => {
            let n = integer(value, target)?;
            let n = u32::try_from(n).map_err(|_| anyhow!("{value} is out of range for u32"))?;
            Ok(format!("{n}u"))
        }
        Scalar::F32 => {
            let n = number(value, target)?;
            if !(n as f32).is_finite() {
                bail!("{value} is out of range for f32");
            }
            Ok(float_text(n))
        }
        Scalar::F16 => {
            let n = number(value, target)?;
            if !f16::from_f64(n).is_finite() {
                bail!("{value} is out of range for f16");
            }
            Ok(format!("{}h", float_text(n)))
        }
    }
}

fn elements<'a>(value: &'a Value, len: usize, schema: &DataSchema) -> Result<&'a [Value]> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("cannot coerce {value} to {schema}: expected an array"))?;
    if items.len() != len {
        bail!(
            "cannot coerce {value} to {schema}: expected {len} elements, got {}",
            items.len()
        );
    }
    Ok(items)
}

fn constructor(name: &str, args: Vec<String>) -> String {
    format!("{name}({})", args.join(", "))
}

/// Resolves a host value to WGSL, coerced to `schema` when one is given.
///
/// Without a schema numbers become abstract literals, booleans stay
/// booleans and arrays become `array(...)`. Objects need a struct schema.
pub(crate) fn resolve_literal(
    ctx: &mut ResolutionCtx,
    value: &Value,
    schema: Option<&DataSchema>,
) -> Result<String> {
    let Some(schema) = schema else {
        return infer_literal(value);
    };

    match schema {
        DataSchema::Scalar(scalar) => scalar_literal(value, *scalar),
        DataSchema::Vector { scalar, len } => {
            let ty = schema.to_string();
            if value.is_number() || value.is_boolean() {
                return Ok(constructor(&ty, vec![scalar_literal(value, *scalar)?]));
            }
            let args = elements(value, *len as usize, schema)?
                .iter()
                .map(|v| scalar_literal(v, *scalar))
                .collect::<Result<Vec<_>>>()?;
            Ok(constructor(&ty, args))
        }
        DataSchema::Matrix { scalar, cols, rows } => {
            let (cols, rows) = (*cols as usize, *rows as usize);
            let items = value
                .as_array()
                .ok_or_else(|| anyhow!("cannot coerce {value} to {schema}: expected an array"))?;
            let flat: Vec<&Value> = if items.len() == cols && items.iter().all(Value::is_array) {
                let mut flat = Vec::with_capacity(cols * rows);
                for column in items {
                    flat.extend(elements(column, rows, schema)?.iter());
                }
                flat
            } else {
                elements(value, cols * rows, schema)?.iter().collect()
            };
            let args = flat
                .into_iter()
                .map(|v| scalar_literal(v, *scalar))
                .collect::<Result<Vec<_>>>()?;
            Ok(constructor(&schema.to_string(), args))
        }
        DataSchema::Array { len: 0, .. } => {
            bail!("cannot construct a value of runtime-sized {schema}")
        }
        DataSchema::Array { elem, len } => {
            let items = elements(value, *len, schema)?;
            let elem_ty = ctx.resolve_schema(elem)?;
            let mut args = Vec::with_capacity(items.len());
            for item in items {
                args.push(resolve_literal(ctx, item, Some(elem))?);
            }
            Ok(constructor(&format!("array<{elem_ty}, {len}>"), args))
        }
        DataSchema::Atomic(_) => bail!("cannot construct a value of {schema}"),
        DataSchema::Struct(def) => {
            let object = value
                .as_object()
                .ok_or_else(|| anyhow!("cannot coerce {value} to {schema}: expected an object"))?;
            if let Some(extra) = object.keys().find(|k| def.field(k).is_none()) {
                bail!("cannot coerce {value} to {schema}: unknown field `{extra}`");
            }
            let name = ctx.resolve_schema(schema)?;
            let mut args = Vec::with_capacity(def.fields().len());
            for (field, field_schema) in def.fields() {
                let field_value = object
                    .get(field)
                    .ok_or_else(|| anyhow!("cannot coerce {value} to {schema}: missing field `{field}`"))?;
                let text = resolve_literal(ctx, field_value, Some(field_schema))
                    .with_context(|| format!("in field `{field}` of {schema}"))?;
                args.push(text);
            }
            Ok(constructor(&name, args))
        }
    }
}

fn infer_literal(value: &Value) -> Result<String> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Ok(u.to_string())
            } else {
                Ok(float_text(number(value, "a number")?))
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                bail!("cannot resolve an empty array without a target schema");
            }
            let args = items.iter().map(infer_literal).collect::<Result<Vec<_>>>()?;
            Ok(constructor("array", args))
        }
        Value::Object(_) => bail!("cannot resolve object {value} without a target schema"),
        Value::String(_) | Value::Null => bail!("cannot resolve {value} as a WGSL value"),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::resolver::{NamingPolicy, ResolveOptions, data::StructSchema};

    fn with_ctx<T>(f: impl FnOnce(&mut ResolutionCtx) -> T) -> T {
        let options = ResolveOptions {
            names: NamingPolicy::Strict,
            ..Default::default()
        };
        let mut ctx = ResolutionCtx::new(&options);
        ctx.codegen(f)
    }

    fn coerce(value: Value, schema: &DataSchema) -> Result<String> {
        with_ctx(|ctx| resolve_literal(ctx, &value, Some(schema)))
    }

    #[test]
    fn number_formatting_prefers_the_shorter_form() {
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(100.0), "100");
        assert_eq!(format_number(1e21), "1e21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(0.01), "0.01");
        assert_eq!(format_number(0.001), "1e-3");
    }

    #[test]
    fn scalars_get_typed_suffixes() {
        assert_eq!(coerce(json!(3), &DataSchema::f32()).unwrap(), "3.0");
        assert_eq!(coerce(json!(3), &DataSchema::i32()).unwrap(), "3i");
        assert_eq!(coerce(json!(-3), &DataSchema::i32()).unwrap(), "-3i");
        assert_eq!(coerce(json!(3.0), &DataSchema::u32()).unwrap(), "3u");
        assert_eq!(coerce(json!(0.5), &DataSchema::Scalar(Scalar::F16)).unwrap(), "0.5h");
        assert_eq!(coerce(json!(true), &DataSchema::bool()).unwrap(), "true");
        assert_eq!(coerce(json!(i32::MIN), &DataSchema::i32()).unwrap(), "i32(-2147483648)");
    }

    #[test]
    fn out_of_range_scalars_fail() {
        assert!(coerce(json!(-1), &DataSchema::u32()).is_err());
        assert!(coerce(json!(1.5), &DataSchema::i32()).is_err());
        assert!(coerce(json!(70000.0), &DataSchema::Scalar(Scalar::F16)).is_err());
        assert!(coerce(json!(1e300), &DataSchema::f32()).is_err());
        assert!(coerce(json!("1"), &DataSchema::f32()).is_err());
    }

    #[test]
    fn vectors_and_matrices() {
        assert_eq!(
            coerce(json!([1, 2, 3]), &DataSchema::vec(Scalar::U32, 3)).unwrap(),
            "vec3u(1u, 2u, 3u)"
        );
        assert_eq!(coerce(json!(0.5), &DataSchema::vec2f()).unwrap(), "vec2f(0.5)");
        assert_eq!(
            coerce(json!([[1, 0], [0, 1]]), &DataSchema::mat(2, 2)).unwrap(),
            "mat2x2f(1.0, 0.0, 0.0, 1.0)"
        );
        let err = coerce(json!([1, 2]), &DataSchema::vec3f()).unwrap_err();
        assert!(err.to_string().contains("expected 3 elements, got 2"), "{err}");
    }

    #[test]
    fn arrays_check_their_length() {
        let schema = DataSchema::array(DataSchema::f32(), 2);
        assert_eq!(coerce(json!([1, 2]), &schema).unwrap(), "array<f32, 2>(1.0, 2.0)");
        assert!(coerce(json!([1, 2, 3]), &schema).is_err());
        assert!(coerce(json!([1]), &DataSchema::array(DataSchema::f32(), 0)).is_err());
    }

    #[test]
    fn structs_use_declared_field_order() {
        let schema = DataSchema::Struct(StructSchema::new(
            Some("Particle"),
            vec![
                ("pos".into(), DataSchema::vec2f()),
                ("mass".into(), DataSchema::f32()),
            ],
        ));
        let text = coerce(json!({ "mass": 2, "pos": [0, 1] }), &schema).unwrap();
        assert_eq!(text, "Particle(vec2f(0.0, 1.0), 2.0)");

        assert!(coerce(json!({ "pos": [0, 1] }), &schema).is_err());
        assert!(coerce(json!({ "pos": [0, 1], "mass": 1, "spin": 0 }), &schema).is_err());
    }

    #[test]
    fn literals_without_schema() {
        assert_eq!(infer_literal(&json!(7)).unwrap(), "7");
        assert_eq!(infer_literal(&json!(2.5)).unwrap(), "2.5");
        assert_eq!(infer_literal(&json!([1, 2])).unwrap(), "array(1, 2)");
        assert!(infer_literal(&json!({ "a": 1 })).is_err());
        assert!(infer_literal(&json!(null)).is_err());
    }

    proptest! {
        #[test]
        fn f32_literals_read_back_exactly(v in -1.0e30f64..1.0e30f64) {
            let text = scalar_literal(&json!(v), Scalar::F32).unwrap();
            prop_assert!(text.contains('.') || text.contains('e'));
            let parsed: f64 = text.parse().unwrap();
            prop_assert_eq!(parsed, v);
        }
    }
}

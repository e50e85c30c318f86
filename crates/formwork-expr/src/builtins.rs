//! Built-in functions: arithmetic, easing, trig, conditional and
//! container queries.

use formwork_core::{props, ObjectId, Value};

use crate::cache::ContainerQuery;
use crate::error::FunctionError;
use crate::registry::{CallContext, FunctionDef, FunctionRegistry, ImplicitDependency};

/// linear(t, t_min, t_max, val_min, val_max): linear interpolation.
pub fn linear(t: f64, t_min: f64, t_max: f64, val_min: f64, val_max: f64) -> f64 {
    if t_max <= t_min {
        return val_min;
    }
    let ratio = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    val_min + (val_max - val_min) * ratio
}

fn ratio(t: f64, t_min: f64, t_max: f64) -> Option<f64> {
    (t_max > t_min).then(|| ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0))
}

/// ease(t, t_min, t_max, val_min, val_max): smooth ease in/out.
pub fn ease(t: f64, t_min: f64, t_max: f64, val_min: f64, val_max: f64) -> f64 {
    let Some(r) = ratio(t, t_min, t_max) else {
        return val_min;
    };
    // Smoothstep
    let s = r * r * (3.0 - 2.0 * r);
    val_min + (val_max - val_min) * s
}

/// easeIn(t, t_min, t_max, val_min, val_max): accelerating ease.
pub fn ease_in(t: f64, t_min: f64, t_max: f64, val_min: f64, val_max: f64) -> f64 {
    let Some(r) = ratio(t, t_min, t_max) else {
        return val_min;
    };
    val_min + (val_max - val_min) * r * r
}

/// easeOut(t, t_min, t_max, val_min, val_max): decelerating ease.
pub fn ease_out(t: f64, t_min: f64, t_max: f64, val_min: f64, val_max: f64) -> f64 {
    let Some(r) = ratio(t, t_min, t_max) else {
        return val_min;
    };
    val_min + (val_max - val_min) * r * (2.0 - r)
}

/// Linear interpolation between two values.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Convert degrees to radians.
pub fn degrees_to_radians(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

/// Convert radians to degrees.
pub fn radians_to_degrees(rad: f64) -> f64 {
    rad * 180.0 / std::f64::consts::PI
}

fn number(args: &[Value], index: usize) -> Result<f64, FunctionError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(FunctionError::new(format!(
            "argument {} must be a number, got {}",
            index + 1,
            other.value_type()
        ))),
        None => Err(FunctionError::new(format!("missing argument {}", index + 1))),
    }
}

fn numbers(args: &[Value]) -> Result<Vec<f64>, FunctionError> {
    (0..args.len()).map(|i| number(args, i)).collect()
}

fn unary(name: &str, f: fn(f64) -> f64) -> FunctionDef {
    FunctionDef::new(name, 1, 1, move |_, args| Ok(Value::Number(f(number(args, 0)?))))
}

fn binary(name: &str, f: fn(f64, f64) -> f64) -> FunctionDef {
    FunctionDef::new(name, 2, 2, move |_, args| {
        Ok(Value::Number(f(number(args, 0)?, number(args, 1)?)))
    })
}

fn easing(name: &str, f: fn(f64, f64, f64, f64, f64) -> f64) -> FunctionDef {
    FunctionDef::new(name, 5, 5, move |_, args| {
        let v = numbers(args)?;
        Ok(Value::Number(f(v[0], v[1], v[2], v[3], v[4])))
    })
}

fn container_dimension(name: &str, property: &'static str) -> FunctionDef {
    FunctionDef::new(name, 0, 0, move |ctx, _| {
        let container = ctx.container()?;
        container
            .number(property)
            .map(Value::Number)
            .ok_or_else(|| FunctionError::new(format!("container {} has no {property}", container.id)))
    })
    .with_implicit(ImplicitDependency::Container(property))
}

fn sibling_count(ctx: &CallContext<'_>, _: &[Value]) -> Result<Value, FunctionError> {
    let container = ctx.container()?;
    ctx.cached(&container.id, ContainerQuery::ChildCount, None, || {
        Ok(Value::Number(ctx.children(&container.id)?.len() as f64))
    })
}

fn sibling_index(ctx: &CallContext<'_>, _: &[Value]) -> Result<Value, FunctionError> {
    let container = ctx.container()?;
    let subject: &ObjectId = ctx.object_id;
    ctx.cached(&container.id, ContainerQuery::SiblingIndex, Some(subject), || {
        let children = ctx.children(&container.id)?;
        children
            .iter()
            .position(|c| c == subject)
            .map(|i| Value::Number(i as f64))
            .ok_or_else(|| FunctionError::new(format!("{subject} is not a child of {}", container.id)))
    })
}

fn child_count(ctx: &CallContext<'_>, _: &[Value]) -> Result<Value, FunctionError> {
    let own = ctx.object_id;
    ctx.cached(own, ContainerQuery::ChildCount, None, || {
        Ok(Value::Number(ctx.children(own)?.len() as f64))
    })
}

/// Install the built-in function set into `registry`.
pub fn register_builtins(registry: &mut FunctionRegistry) {
    let defs = [
        unary("abs", f64::abs),
        unary("round", f64::round),
        unary("floor", f64::floor),
        unary("ceil", f64::ceil),
        FunctionDef::new("sqrt", 1, 1, |_, args| {
            let x = number(args, 0)?;
            if x < 0.0 {
                return Err(FunctionError::new("sqrt of a negative number"));
            }
            Ok(Value::Number(x.sqrt()))
        }),
        binary("pow", f64::powf),
        FunctionDef::new("min", 1, usize::MAX, |_, args| {
            let v = numbers(args)?;
            Ok(Value::Number(v.into_iter().fold(f64::INFINITY, f64::min)))
        }),
        FunctionDef::new("max", 1, usize::MAX, |_, args| {
            let v = numbers(args)?;
            Ok(Value::Number(v.into_iter().fold(f64::NEG_INFINITY, f64::max)))
        }),
        FunctionDef::new("sum", 0, usize::MAX, |_, args| {
            Ok(Value::Number(numbers(args)?.into_iter().sum()))
        }),
        FunctionDef::new("avg", 1, usize::MAX, |_, args| {
            let v = numbers(args)?;
            Ok(Value::Number(v.iter().sum::<f64>() / v.len() as f64))
        }),
        FunctionDef::new("clamp", 3, 3, |_, args| {
            let (x, lo, hi) = (number(args, 0)?, number(args, 1)?, number(args, 2)?);
            if lo > hi {
                return Err(FunctionError::new(format!("clamp bounds reversed: {lo} > {hi}")));
            }
            Ok(Value::Number(x.clamp(lo, hi)))
        }),
        FunctionDef::new("lerp", 3, 3, |_, args| {
            Ok(Value::Number(lerp(number(args, 0)?, number(args, 1)?, number(args, 2)?)))
        }),
        easing("linear", linear),
        easing("ease", ease),
        easing("easeIn", ease_in),
        easing("easeOut", ease_out),
        unary("sin", f64::sin),
        unary("cos", f64::cos),
        unary("tan", f64::tan),
        unary("asin", f64::asin),
        unary("acos", f64::acos),
        unary("atan", f64::atan),
        binary("atan2", f64::atan2),
        unary("radians", degrees_to_radians),
        unary("degrees", radians_to_degrees),
        FunctionDef::new("pi", 0, 0, |_, _| Ok(Value::Number(std::f64::consts::PI))),
        FunctionDef::select("if"),
        container_dimension("containerWidth", props::WIDTH),
        container_dimension("containerHeight", props::HEIGHT),
        container_dimension("containerDepth", props::DEPTH),
        FunctionDef::new("siblingCount", 0, 0, sibling_count)
            .with_implicit(ImplicitDependency::Container(props::CHILDREN)),
        FunctionDef::new("siblingIndex", 0, 0, sibling_index)
            .with_implicit(ImplicitDependency::Container(props::CHILDREN)),
        FunctionDef::new("childCount", 0, 0, child_count)
            .with_implicit(ImplicitDependency::Own(props::CHILDREN)),
    ];
    for def in defs {
        registry.register(def);
    }
}

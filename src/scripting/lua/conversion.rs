use mlua::{Error as LuaError, Lua, Result as LuaResult, Value as LuaValue};
use serde_json::Value as JsonValue;

/// Deepest table nesting converted back to JSON; guards self-referencing tables
const MAX_DEPTH: usize = 128;

/// Convert JSON value to Lua value
pub fn json_to_lua(lua: &Lua, json: &JsonValue) -> LuaResult<LuaValue> {
    match json {
        JsonValue::Null => Ok(LuaValue::Nil),
        JsonValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Ok(LuaValue::Integer(i)),
            None => Ok(LuaValue::Number(n.as_f64().unwrap_or(f64::NAN))),
        },
        JsonValue::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        JsonValue::Array(arr) => {
            let table = lua.create_table_with_capacity(arr.len(), 0)?;
            for (i, v) in arr.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        JsonValue::Object(obj) => {
            let table = lua.create_table_with_capacity(0, obj.len())?;
            for (k, v) in obj {
                table.raw_set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert Lua value to JSON value
///
/// Tables whose keys are exactly `1..n` become arrays, other tables become
/// objects. Functions, threads and userdata have no JSON form.
pub fn lua_value_to_json(value: &LuaValue) -> LuaResult<JsonValue> {
    to_json_at(value, 0)
}

fn to_json_at(value: &LuaValue, depth: usize) -> LuaResult<JsonValue> {
    match value {
        LuaValue::Nil => Ok(JsonValue::Null),
        LuaValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        LuaValue::Integer(i) => Ok(JsonValue::Number((*i).into())),
        LuaValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .ok_or_else(|| LuaError::RuntimeError(format!("cannot encode {} as JSON", n))),
        LuaValue::String(s) => Ok(JsonValue::String(s.to_str()?.to_string())),
        LuaValue::Table(t) => {
            if depth >= MAX_DEPTH {
                return Err(LuaError::RuntimeError(
                    "table nesting too deep to encode as JSON".to_string(),
                ));
            }

            let mut count = 0i64;
            let mut max_key = 0i64;
            let mut is_array = true;
            for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                let (k, _) = pair?;
                count += 1;
                match k {
                    LuaValue::Integer(i) if i > 0 => max_key = max_key.max(i),
                    _ => is_array = false,
                }
            }

            if is_array && count > 0 && count == max_key {
                let mut arr = Vec::with_capacity(count as usize);
                for i in 1..=max_key {
                    let val: LuaValue = t.raw_get(i)?;
                    arr.push(to_json_at(&val, depth + 1)?);
                }
                return Ok(JsonValue::Array(arr));
            }

            let mut map = serde_json::Map::new();
            for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair?;
                let key = match k {
                    LuaValue::String(s) => s.to_str()?.to_string(),
                    LuaValue::Integer(i) => i.to_string(),
                    LuaValue::Number(n) => n.to_string(),
                    LuaValue::Boolean(b) => b.to_string(),
                    _ => continue,
                };
                map.insert(key, to_json_at(&v, depth + 1)?);
            }
            Ok(JsonValue::Object(map))
        }
        other => Err(LuaError::RuntimeError(format!(
            "cannot encode a Lua {} as JSON",
            other.type_name()
        ))),
    }
}

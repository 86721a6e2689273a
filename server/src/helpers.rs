use std::{
    env,
    fmt::{Debug, Display},
    str::FromStr,
};

use tracing::warn;

pub fn get_env_var_or_default<T>(var_name: &str, default: T) -> T
where
    T: ToString + Display + Debug + FromStr,
    <T as FromStr>::Err: Display,
{
    match env::var(var_name) {
        Ok(val) => match T::from_str(val.trim()) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(
                    var = var_name,
                    value = %val,
                    default = %default,
                    %error,
                    "Unparsable env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Splits a comma-separated env var into trimmed, non-empty items. A var
/// with no items at all yields `default`.
pub fn get_env_list_or_default(var_name: &str, default: &[&str]) -> Vec<String> {
    let raw = get_env_var_or_default(var_name, default.join(","));
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if items.is_empty() {
        warn!(var = var_name, value = %raw, "Empty list env var, using default");
        return default.iter().map(|item| item.to_string()).collect();
    }
    items
}

//! Builtin commands: the minimum set described in the session & command
//! engine behavioral spec.

use std::collections::HashMap;

use crate::canonical::ReasoningEffort;
use crate::config::RoutePolicy;
use crate::session::state::{FailoverRoute, OneoffRoute, SessionState};

use super::Command;

pub struct SetCommand;

impl Command for SetCommand {
    fn name(&self) -> &'static str {
        "set"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        if args.is_empty() {
            return Err("set requires at least one key=value pair".into());
        }
        let mut applied = Vec::new();
        for (key, value) in args {
            match key.as_str() {
                "backend" => {
                    state.backend_override = Some(value.clone());
                    applied.push(format!("backend={value}"));
                }
                "model" => {
                    state.model_override = Some(value.clone());
                    applied.push(format!("model={value}"));
                }
                "project" => {
                    state.project = Some(value.clone());
                    applied.push(format!("project={value}"));
                }
                "temperature" => {
                    let t: f32 = value
                        .parse()
                        .map_err(|_| format!("invalid temperature: {value}"))?;
                    state.reasoning.temperature = Some(t);
                    applied.push(format!("temperature={t}"));
                }
                "top_p" => {
                    let t: f32 = value.parse().map_err(|_| format!("invalid top_p: {value}"))?;
                    state.reasoning.top_p = Some(t);
                    applied.push(format!("top_p={t}"));
                }
                "interactive" => {
                    let b: bool = value
                        .parse()
                        .map_err(|_| format!("invalid interactive flag: {value}"))?;
                    state.interactive_mode = b;
                    applied.push(format!("interactive={b}"));
                }
                other => return Err(format!("unknown set key: {other}")),
            }
        }
        Ok(format!("updated: {}", applied.join(", ")))
    }
}

fn parse_route_elements(raw: &str) -> Result<Vec<(String, String)>, String> {
    raw.split(';')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, ':');
            let backend = parts.next().unwrap_or_default().trim().to_string();
            let model = parts
                .next()
                .ok_or_else(|| format!("malformed route element: {pair}"))?
                .trim()
                .to_string();
            if backend.is_empty() || model.is_empty() {
                return Err(format!("malformed route element: {pair}"));
            }
            Ok((backend, model))
        })
        .collect()
}

pub struct RouteDefineCommand;

impl Command for RouteDefineCommand {
    fn name(&self) -> &'static str {
        "route.define"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let name = args.get("name").ok_or("route.define requires name=")?.clone();
        let policy = match args.get("policy").map(String::as_str) {
            Some("k") | None => RoutePolicy::K,
            Some("m") => RoutePolicy::M,
            Some("km") => RoutePolicy::Km,
            Some("mk") => RoutePolicy::Mk,
            Some(other) => return Err(format!("unknown policy: {other}")),
        };
        let elements = match args.get("elements") {
            Some(raw) => parse_route_elements(raw)?,
            None => Vec::new(),
        };
        state.failover_routes.insert(
            name.clone(),
            FailoverRoute {
                name: name.clone(),
                policy,
                elements,
            },
        );
        Ok(format!("route '{name}' defined"))
    }
}

pub struct RouteDeleteCommand;

impl Command for RouteDeleteCommand {
    fn name(&self) -> &'static str {
        "route.delete"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let name = args.get("name").ok_or("route.delete requires name=")?;
        if state.failover_routes.remove(name).is_some() {
            Ok(format!("route '{name}' deleted"))
        } else {
            Err(format!("route '{name}' not found"))
        }
    }
}

pub struct RouteListCommand;

impl Command for RouteListCommand {
    fn name(&self) -> &'static str {
        "route.list"
    }

    fn execute(&self, _args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        if state.failover_routes.is_empty() {
            return Ok("no routes defined".into());
        }
        let mut names: Vec<&String> = state.failover_routes.keys().collect();
        names.sort();
        Ok(format!("routes: {}", names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")))
    }
}

fn route_mut<'a>(state: &'a mut SessionState, name: &str) -> Result<&'a mut FailoverRoute, String> {
    state
        .failover_routes
        .get_mut(name)
        .ok_or_else(|| format!("route '{name}' not found"))
}

pub struct RouteAppendCommand;

impl Command for RouteAppendCommand {
    fn name(&self) -> &'static str {
        "route.append"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let name = args.get("name").ok_or("route.append requires name=")?.clone();
        let elements = parse_route_elements(args.get("elements").ok_or("route.append requires elements=")?)?;
        let route = route_mut(state, &name)?;
        route.elements.extend(elements);
        Ok(format!("route '{name}' appended"))
    }
}

pub struct RoutePrependCommand;

impl Command for RoutePrependCommand {
    fn name(&self) -> &'static str {
        "route.prepend"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let name = args.get("name").ok_or("route.prepend requires name=")?.clone();
        let mut elements = parse_route_elements(args.get("elements").ok_or("route.prepend requires elements=")?)?;
        let route = route_mut(state, &name)?;
        elements.extend(route.elements.drain(..));
        route.elements = elements;
        Ok(format!("route '{name}' prepended"))
    }
}

pub struct RouteClearCommand;

impl Command for RouteClearCommand {
    fn name(&self) -> &'static str {
        "route.clear"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let name = args.get("name").ok_or("route.clear requires name=")?;
        let route = route_mut(state, name)?;
        route.elements.clear();
        Ok(format!("route '{name}' cleared"))
    }
}

pub struct OneoffCommand;

impl Command for OneoffCommand {
    fn name(&self) -> &'static str {
        "oneoff"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let backend = args.get("backend").ok_or("oneoff requires backend=")?.clone();
        let model = args.get("model").ok_or("oneoff requires model=")?.clone();
        state.oneoff_route = Some(OneoffRoute {
            backend: backend.clone(),
            model: model.clone(),
        });
        Ok(format!("one-off route set: {backend}:{model}"))
    }
}

pub struct ReasoningCommand;

impl Command for ReasoningCommand {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    fn execute(&self, args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        let mode = args.get("mode").map(String::as_str).unwrap_or("medium");
        state.reasoning.effort = match mode {
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            "none" => None,
            other => return Err(format!("unknown reasoning mode: {other}")),
        };
        if let Some(prefix) = args.get("prefix") {
            state.reasoning.prompt_prefix = Some(prefix.clone());
        }
        if let Some(suffix) = args.get("suffix") {
            state.reasoning.prompt_suffix = Some(suffix.clone());
        }
        Ok(format!("reasoning mode set to {mode}"))
    }
}

pub struct HelpCommand;

impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn execute(&self, _args: &HashMap<String, String>, _state: &mut SessionState) -> Result<String, String> {
        Ok("available commands: set, route.define, route.delete, route.list, \
            route.append, route.prepend, route.clear, oneoff, reasoning, help, hello, pwd"
            .into())
    }
}

pub struct HelloCommand;

impl Command for HelloCommand {
    fn name(&self) -> &'static str {
        "hello"
    }

    fn execute(&self, _args: &HashMap<String, String>, _state: &mut SessionState) -> Result<String, String> {
        Ok("hello from the proxy".into())
    }
}

pub struct PwdCommand;

impl Command for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn execute(&self, _args: &HashMap<String, String>, state: &mut SessionState) -> Result<String, String> {
        Ok(format!("project: {}", state.project.as_deref().unwrap_or("(none)")))
    }
}

// Copyright 2025 MarshRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # MarshRPC CLI
//!
//! Command-line interface for the MarshRPC framework.
//!
//! This crate hosts the demo calculator contract served and called by the
//! `marshrpc` binary:
//!
//! - **Serving**: [`calculator_server`] binds a handler to every procedure
//! - **Calling**: [`call_by_name`] turns command-line strings into a typed call
//!
//! ## Key Commands
//!
//! - `marshrpc serve`: Serve the calculator over TCP until Ctrl-C
//! - `marshrpc call`: Invoke one procedure (outputs raw JSON for scripting)

use std::sync::Arc;

use marshrpc_client::Client;
use marshrpc_common::protocol::{Contract, Declaration, ErrorKind, Marshal, RemoteError, Result, RpcError};
use marshrpc_common::transport::Transport;
use marshrpc_server::{Server, ServerBuilder, ServerConfig};
use serde_json::{json, Value};


/// Address `serve` binds to when neither `--bind` nor `MARSHRPC_BIND` is set
pub const DEFAULT_BIND: &str = "127.0.0.1:7400";

/// Environment variable overriding the default bind address
pub const BIND_ENV: &str = "MARSHRPC_BIND";

pub const ADD: Declaration<(i64, i64), i64> = Declaration::new(1, "add");
pub const SUB: Declaration<(i64, i64), i64> = Declaration::new(2, "sub");
pub const MUL: Declaration<(i64, i64), i64> = Declaration::new(3, "mul");
pub const DIV: Declaration<(i64, i64), i64> = Declaration::new(4, "div");
pub const SUM: Declaration<(Vec<f64>,), f64> = Declaration::new(5, "sum");
pub const CONCAT: Declaration<(String, String), String> = Declaration::new(6, "concat");
pub const ECHO: Declaration<(String,), String> = Declaration::new(7, "echo");
pub const FAIL: Declaration<(String,), ()> = Declaration::new(8, "fail");

/// Builds the demo calculator contract.
pub fn calculator_contract() -> Result<Arc<Contract>> {
    let contract = Contract::builder("calculator")
        .declare(&ADD)
        .declare(&SUB)
        .declare(&MUL)
        .declare(&DIV)
        .declare(&SUM)
        .declare(&CONCAT)
        .declare(&ECHO)
        .declare(&FAIL)
        .build()?;
    Ok(Arc::new(contract))
}

fn overflow(operation: &str) -> RemoteError {
    RemoteError::invalid_argument(format!("{} overflows a 64-bit integer", operation))
}

/// Builds a server with a handler for every calculator procedure.
///
/// Integer operations reject overflow and division by zero with
/// `InvalidArgument`; `fail` always fails with `Application` and the given
/// message.
pub fn calculator_server(config: ServerConfig) -> Result<Server> {
    ServerBuilder::new(calculator_contract()?)
        .bind(&ADD, |(a, b)| a.checked_add(b).ok_or_else(|| overflow("addition")))
        .bind(&SUB, |(a, b)| a.checked_sub(b).ok_or_else(|| overflow("subtraction")))
        .bind(&MUL, |(a, b)| a.checked_mul(b).ok_or_else(|| overflow("multiplication")))
        .bind(&DIV, |(a, b)| {
            if b == 0 {
                return Err(RemoteError::invalid_argument("division by zero"));
            }
            a.checked_div(b).ok_or_else(|| overflow("division"))
        })
        .bind(&SUM, |(values,)| Ok(values.iter().sum()))
        .bind(&CONCAT, |(a, b)| Ok(a + &b))
        .bind(&ECHO, |(text,)| Ok(text))
        .bind(&FAIL, |(message,)| Err(RemoteError::new(ErrorKind::Application, message)))
        .config(config)
        .build()
}

/// Resolves the bind address: command-line flag, then environment, then default.
pub fn resolve_bind(flag: Option<String>, env: Option<String>) -> String {
    flag.or(env).unwrap_or_else(|| DEFAULT_BIND.to_string())
}

fn parse_arg<T: std::str::FromStr>(procedure: &str, index: usize, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| {
        RpcError::BadCall(format!(
            "argument {} of '{}' is not a valid {}: {}",
            index + 1,
            procedure,
            std::any::type_name::<T>(),
            e
        ))
    })
}

fn expect_args(procedure: &str, args: &[String], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(RpcError::BadCall(format!(
            "'{}' takes {} arguments, got {}",
            procedure,
            count,
            args.len()
        )));
    }
    Ok(())
}

async fn call_integers<T: Transport>(
    client: &mut Client<T>,
    declaration: &Declaration<(i64, i64), i64>,
    args: &[String],
) -> Result<Value> {
    let name = declaration.name();
    expect_args(name, args, 2)?;
    let a = parse_arg(name, 0, &args[0])?;
    let b = parse_arg(name, 1, &args[1])?;
    invoke_json(client, declaration, (a, b)).await
}

async fn invoke_json<T, A, R>(client: &mut Client<T>, declaration: &Declaration<A, R>, args: A) -> Result<Value>
where
    T: Transport,
    A: Marshal,
    R: Marshal + Into<Value>,
{
    Ok(client.invoke(declaration, args).await?.into())
}

/// Calls a calculator procedure by name with arguments given as strings.
///
/// This is the untyped entry point used by the command line; argument
/// count and parse errors are reported as `BadCall` before anything is sent.
///
/// # Arguments
/// * `client` - A client over the calculator contract
/// * `procedure` - Procedure name, e.g. `add`
/// * `args` - Raw arguments in declaration order (`sum` takes any number)
///
/// # Returns
/// The result as JSON (`null` for procedures without a result)
pub async fn call_by_name<T: Transport>(client: &mut Client<T>, procedure: &str, args: &[String]) -> Result<Value> {
    match procedure {
        "add" => call_integers(client, &ADD, args).await,
        "sub" => call_integers(client, &SUB, args).await,
        "mul" => call_integers(client, &MUL, args).await,
        "div" => call_integers(client, &DIV, args).await,
        "sum" => {
            let values = args
                .iter()
                .enumerate()
                .map(|(i, raw)| parse_arg::<f64>("sum", i, raw))
                .collect::<Result<Vec<_>>>()?;
            invoke_json(client, &SUM, (values,)).await
        }
        "concat" => {
            expect_args("concat", args, 2)?;
            invoke_json(client, &CONCAT, (args[0].clone(), args[1].clone())).await
        }
        "echo" => {
            expect_args("echo", args, 1)?;
            invoke_json(client, &ECHO, (args[0].clone(),)).await
        }
        "fail" => {
            expect_args("fail", args, 1)?;
            client.invoke(&FAIL, (args[0].clone(),)).await?;
            Ok(Value::Null)
        }
        other => Err(RpcError::BadCall(format!(
            "unknown procedure '{}'; expected one of: {}",
            other,
            procedure_names().join(", ")
        ))),
    }
}

/// Names of the calculator procedures in call id order.
pub fn procedure_names() -> Vec<&'static str> {
    vec![
        ADD.name(),
        SUB.name(),
        MUL.name(),
        DIV.name(),
        SUM.name(),
        CONCAT.name(),
        ECHO.name(),
        FAIL.name(),
    ]
}

/// Renders a failed call for stderr.
pub fn describe_error(error: &RpcError) -> Value {
    match error {
        RpcError::Protocol(remote) => json!({
            "kind": remote.kind.to_string(),
            "message": remote.message,
        }),
        other => json!({
            "kind": other.kind().to_string(),
            "message": other.to_string(),
        }),
    }
}

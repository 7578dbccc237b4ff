//! WebSocket intrinsic dispatch
//!
//! Function calls whose name starts with `ws.` lower to dedicated opcodes
//! instead of the generic call path. Argument counts are enforced here, at
//! compile time. Names the table does not know fall through to the generic
//! path, where the host may still provide them.
//!
//! | Call | Argc | Emission |
//! |------|------|----------|
//! | `ws.send(msg)` | 1 | msg; `WsSend` |
//! | `ws.broadcast(msg[, opts])` | 1-2 | msg; `WsBroadcast` |
//! | `ws.broadcast_to_room(room, msg)` | 2 | room; msg; `WsBroadcastRoom` |
//! | `ws.join(room)` | 1 | room; `WsJoinRoom` |
//! | `ws.leave(room)` | 1 | room; `WsLeaveRoom` |
//! | `ws.close([reason])` | 0-1 | reason (or ""); `WsClose` |
//! | `ws.get_rooms()` | 0 | `WsGetRooms` |
//! | `ws.get_room_users(room)` | 1 | room; `WsGetClients` |
//! | `ws.get_room_count()` | 0 | "length"; `WsGetRooms`; `Call 1` |
//! | `ws.get_room_user_count(room)` | 1 | "length"; room; `WsGetClients`; `Call 1` |
//! | `ws.get_connection_count()` | 0 | `WsGetConnCount` |
//! | `ws.get_uptime()` | 0 | `WsGetUptime` |

use crate::ast::Expr;
use crate::value::Value;

use super::compiler::{CompileResult, Compiler, SemanticError};
use super::opcodes::Opcode;

/// Lower a `ws.*` call, returning whether the name was handled
///
/// `Ok(false)` means the caller should fall through to the generic call
/// path; errors are compile-time arity violations.
pub(crate) fn compile_ws_call(
    c: &mut Compiler,
    name: &str,
    args: &[Expr],
) -> CompileResult<bool> {
    match name {
        "ws.send" => {
            check_arity(name, "1", args, 1..=1)?;
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsSend);
        }
        "ws.broadcast" => {
            // The optional second argument carries host-side delivery
            // options and is consumed before compilation
            check_arity(name, "1 or 2", args, 1..=2)?;
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsBroadcast);
        }
        "ws.broadcast_to_room" => {
            check_arity(name, "2", args, 2..=2)?;
            c.compile_expr(&args[0])?;
            c.compile_expr(&args[1])?;
            c.builder.emit(Opcode::WsBroadcastRoom);
        }
        "ws.join" => {
            check_arity(name, "1", args, 1..=1)?;
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsJoinRoom);
        }
        "ws.leave" => {
            check_arity(name, "1", args, 1..=1)?;
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsLeaveRoom);
        }
        "ws.close" => {
            check_arity(name, "0 or 1", args, 0..=1)?;
            match args.first() {
                Some(reason) => c.compile_expr(reason)?,
                None => {
                    c.builder.emit_constant(Value::string(""));
                }
            }
            c.builder.emit(Opcode::WsClose);
        }
        "ws.get_rooms" => {
            check_arity(name, "0", args, 0..=0)?;
            c.builder.emit(Opcode::WsGetRooms);
        }
        "ws.get_room_users" | "ws.get_room_clients" => {
            check_arity(name, "1", args, 1..=1)?;
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsGetClients);
        }
        "ws.get_room_count" => {
            check_arity(name, "0", args, 0..=0)?;
            c.builder.emit_constant(Value::string("length"));
            c.builder.emit(Opcode::WsGetRooms);
            c.builder.emit_with(Opcode::Call, 1);
        }
        "ws.get_room_user_count" => {
            check_arity(name, "1", args, 1..=1)?;
            c.builder.emit_constant(Value::string("length"));
            c.compile_expr(&args[0])?;
            c.builder.emit(Opcode::WsGetClients);
            c.builder.emit_with(Opcode::Call, 1);
        }
        "ws.get_connection_count" => {
            check_arity(name, "0", args, 0..=0)?;
            c.builder.emit(Opcode::WsGetConnCount);
        }
        "ws.get_uptime" => {
            check_arity(name, "0", args, 0..=0)?;
            c.builder.emit(Opcode::WsGetUptime);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn check_arity(
    name: &str,
    expected: &'static str,
    args: &[Expr],
    accepted: std::ops::RangeInclusive<usize>,
) -> CompileResult<()> {
    if accepted.contains(&args.len()) {
        Ok(())
    } else {
        Err(SemanticError::ArityMismatch {
            function: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

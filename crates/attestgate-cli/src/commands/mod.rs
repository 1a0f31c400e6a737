pub mod verify;

use crate::cli::Command;

pub fn dispatch(command: Command) -> i32 {
    match command {
        Command::Verify(args) => verify::cmd_verify(&args),
    }
}

//! Conversions between wire messages and the core message types.

use waterfall::{CmdProgress, Command, Error, ForwardFrame, TransferChunk};

use crate::proto::{self, cmd_progress::Output, forward_message::Op};

impl From<proto::Transfer> for TransferChunk {
    fn from(t: proto::Transfer) -> Self {
        Self {
            path: t.path,
            payload: t.payload,
            success: t.success,
            error: String::from_utf8_lossy(&t.err).into_owned(),
        }
    }
}

impl From<TransferChunk> for proto::Transfer {
    fn from(c: TransferChunk) -> Self {
        Self {
            path: c.path,
            payload: c.payload,
            success: c.success,
            err: c.error.into_bytes(),
        }
    }
}

impl From<proto::Cmd> for Command {
    fn from(c: proto::Cmd) -> Self {
        Self {
            path: c.path,
            args: c.args,
            dir: c.dir,
            pipe_in: c.pipe_in,
        }
    }
}

impl From<Command> for proto::Cmd {
    fn from(c: Command) -> Self {
        Self {
            path: c.path,
            args: c.args,
            dir: c.dir,
            pipe_in: c.pipe_in,
        }
    }
}

impl From<CmdProgress> for proto::CmdProgress {
    fn from(p: CmdProgress) -> Self {
        let output = match p {
            CmdProgress::Stdout(b) => Output::Stdout(b),
            CmdProgress::Stderr(b) => Output::Stderr(b),
            CmdProgress::Exit(code) => Output::ExitCode(code),
        };
        Self {
            output: Some(output),
        }
    }
}

impl TryFrom<proto::CmdProgress> for CmdProgress {
    type Error = Error;

    fn try_from(p: proto::CmdProgress) -> Result<Self, Error> {
        match p.output {
            Some(Output::Stdout(b)) => Ok(Self::Stdout(b)),
            Some(Output::Stderr(b)) => Ok(Self::Stderr(b)),
            Some(Output::ExitCode(code)) => Ok(Self::Exit(code)),
            None => Err(Error::InvalidArgument(
                "progress message without output".to_string(),
            )),
        }
    }
}

/// Interpret a forward message that follows the opening one.
pub(crate) fn forward_frame(msg: proto::ForwardMessage) -> ForwardFrame {
    match Op::try_from(msg.op) {
        Ok(Op::Close) => ForwardFrame::Close,
        _ => ForwardFrame::Data(msg.payload),
    }
}

impl From<ForwardFrame> for proto::ForwardMessage {
    fn from(f: ForwardFrame) -> Self {
        match f {
            ForwardFrame::Data(payload) => Self {
                op: Op::Write.into(),
                payload,
                ..Default::default()
            },
            ForwardFrame::Close => Self {
                op: Op::Close.into(),
                ..Default::default()
            },
        }
    }
}

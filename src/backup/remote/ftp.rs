use crate::backup::function_path;
use crate::backup::remote::{RemoteConnector, RemoteSession, RemoteTarget};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::io::Read;
use std::net::Ipv6Addr;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::{debug, trace};

pub static DEFAULT_FTP_PORT: u16 = 21;

/// `host` with the default FTP port appended when it carries none. Bare IPv6
/// literals are bracketed first.
pub fn socket_address(host: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        return format!("[{}]:{}", host, DEFAULT_FTP_PORT);
    }
    let has_port = host.rsplit_once(':').is_some_and(|(name, port)| {
        !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && !name.ends_with(':')
    });
    if has_port {
        host.to_string()
    } else {
        format!("{}:{}", host, DEFAULT_FTP_PORT)
    }
}

/// Plain FTP, binary transfers, no TLS.
#[derive(Clone, Copy, Debug, Default)]
pub struct FtpConnector;

pub struct FtpSession {
    stream: FtpStream,
}

impl RemoteConnector for FtpConnector {
    type Session = FtpSession;

    #[named]
    fn connect(&self, target: &RemoteTarget) -> Result<FtpSession> {
        let address = socket_address(target.host());
        debug!("Connecting to {}", address);
        let mut stream = FtpStream::connect(address.as_str())
            .map_err(Error::from)
            .add_msg(format!("Cannot connect to {}", address))
            .add_fn_name(function_path!())?;
        stream
            .login(target.user().as_str(), target.password().inner().as_str())
            .map_err(Error::from)
            .add_msg(format!("Login as {} on {} failed", target.user(), target.host()))
            .add_fn_name(function_path!())?;
        stream.transfer_type(FileType::Binary)?;
        Ok(FtpSession { stream })
    }
}

impl RemoteSession for FtpSession {
    fn make_dir(&mut self, path: &str) -> Result<()> {
        trace!("MKD {}", path);
        Ok(self.stream.mkdir(path)?)
    }

    fn upload(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        trace!("STOR {}", path);
        let mut reader = reader;
        Ok(self.stream.put_file(path, &mut reader)?)
    }

    fn list_names(&mut self, dir: &str) -> Result<Vec<String>> {
        trace!("NLST {}", dir);
        Ok(self.stream.nlst(Some(dir))?)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        trace!("DELE {}", path);
        Ok(self.stream.rm(path)?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.stream.quit()?)
    }
}

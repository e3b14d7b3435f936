//! Modbus TCP front end.
//!
//! Each connection gets a [`ModbusService`] sharing the proxy's
//! [`ServerContext`]. Requests are routed by unit id to a slave context and
//! by function code to one of its register blocks; failures become Modbus
//! exception responses.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_modbus::prelude::*;
use tokio_modbus::server::Service;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};
use tracing::{debug, error, info, warn};

use crate::error::ProxyError;
use crate::server::ServerContext;
use crate::slave::{SlaveContext, function_code};
use crate::store::RegisterStore;

/// Per-connection request handler.
pub struct ModbusService<S> {
    context: Arc<ServerContext<S>>,
}

impl<S> ModbusService<S> {
    pub fn new(context: Arc<ServerContext<S>>) -> Self {
        Self { context }
    }
}

impl<S: RegisterStore> Service for ModbusService<S> {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Response, ExceptionCode>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let context = Arc::clone(&self.context);
        Box::pin(async move { handle_request(&context, req.slave, req.request).await })
    }
}

/// Answer one request addressed to `unit_id`.
pub async fn handle_request<S: RegisterStore>(
    context: &ServerContext<S>,
    unit_id: u8,
    request: Request<'_>,
) -> Result<Response, ExceptionCode> {
    let Some(slave) = context.slave(unit_id) else {
        warn!(unit_id, "Request for unknown unit");
        return Err(ProxyError::UnknownUnit(unit_id).exception_code());
    };

    debug!(unit_id, ?request, "Modbus request");

    match request {
        Request::ReadCoils(address, count) => {
            let values = read(slave, function_code::READ_COILS, address, count).await?;
            Ok(Response::ReadCoils(to_coils(&values)))
        }
        Request::ReadDiscreteInputs(address, count) => {
            let values = read(slave, function_code::READ_DISCRETE_INPUTS, address, count).await?;
            Ok(Response::ReadDiscreteInputs(to_coils(&values)))
        }
        Request::ReadHoldingRegisters(address, count) => {
            let values = read(slave, function_code::READ_HOLDING_REGISTERS, address, count).await?;
            Ok(Response::ReadHoldingRegisters(values))
        }
        Request::ReadInputRegisters(address, count) => {
            let values = read(slave, function_code::READ_INPUT_REGISTERS, address, count).await?;
            Ok(Response::ReadInputRegisters(values))
        }
        Request::WriteSingleCoil(address, coil) => {
            write(
                slave,
                function_code::WRITE_SINGLE_COIL,
                address,
                vec![u16::from(coil)],
            )
            .await?;
            Ok(Response::WriteSingleCoil(address, coil))
        }
        Request::WriteMultipleCoils(address, coils) => {
            let values: Vec<u16> = coils.iter().map(|c| u16::from(*c)).collect();
            let count = values.len() as u16;
            write(slave, function_code::WRITE_MULTIPLE_COILS, address, values).await?;
            Ok(Response::WriteMultipleCoils(address, count))
        }
        Request::WriteSingleRegister(address, word) => {
            write(
                slave,
                function_code::WRITE_SINGLE_REGISTER,
                address,
                vec![word],
            )
            .await?;
            Ok(Response::WriteSingleRegister(address, word))
        }
        Request::WriteMultipleRegisters(address, words) => {
            let count = words.len() as u16;
            write(
                slave,
                function_code::WRITE_MULTIPLE_REGISTERS,
                address,
                words.into_owned(),
            )
            .await?;
            Ok(Response::WriteMultipleRegisters(address, count))
        }
        Request::MaskWriteRegister(address, and_mask, or_mask) => {
            let fc = function_code::MASK_WRITE_REGISTER;
            if !slave.validate(fc, address, 1) {
                debug!(unit_id, fc, address, "Mask write out of range");
                return Err(ExceptionCode::IllegalDataAddress);
            }
            slave
                .update_value(fc, address, |current| {
                    (current & and_mask) | (or_mask & !and_mask)
                })
                .await
                .map_err(|e| exception(slave, fc, e))?;
            Ok(Response::MaskWriteRegister(address, and_mask, or_mask))
        }
        Request::ReadWriteMultipleRegisters(read_address, count, write_address, words) => {
            let fc = function_code::READ_WRITE_MULTIPLE_REGISTERS;
            // Both ranges are checked before the write reaches the store
            if !slave.validate(fc, read_address, count) {
                debug!(unit_id, fc, read_address, count, "Read range out of range");
                return Err(ExceptionCode::IllegalDataAddress);
            }
            write(slave, fc, write_address, words.into_owned()).await?;
            let values = read(slave, fc, read_address, count).await?;
            Ok(Response::ReadWriteMultipleRegisters(values))
        }
        other => {
            warn!(unit_id, request = ?other, "Unsupported Modbus function");
            Err(ExceptionCode::IllegalFunction)
        }
    }
}

async fn read<S: RegisterStore>(
    slave: &SlaveContext<S>,
    fc: u8,
    address: u16,
    count: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    if !slave.validate(fc, address, count) {
        debug!(unit_id = slave.unit_id(), fc, address, count, "Read out of range");
        return Err(ExceptionCode::IllegalDataAddress);
    }
    slave
        .get_values(fc, address, count)
        .await
        .map_err(|e| exception(slave, fc, e))
}

async fn write<S: RegisterStore>(
    slave: &SlaveContext<S>,
    fc: u8,
    address: u16,
    values: Vec<u16>,
) -> Result<(), ExceptionCode> {
    if values.is_empty() || !slave.validate(fc, address, values.len() as u16) {
        debug!(unit_id = slave.unit_id(), fc, address, count = values.len(), "Write out of range");
        return Err(ExceptionCode::IllegalDataAddress);
    }
    slave
        .set_values(fc, address, values)
        .await
        .map_err(|e| exception(slave, fc, e))
}

fn exception<S: RegisterStore>(slave: &SlaveContext<S>, fc: u8, err: ProxyError) -> ExceptionCode {
    warn!(unit_id = slave.unit_id(), fc, error = %err, "Request failed");
    err.exception_code()
}

fn to_coils(values: &[u16]) -> Vec<bool> {
    values.iter().map(|v| *v != 0).collect()
}

/// Serve `context` on `listener` until the listener fails.
pub async fn serve_listener<S: RegisterStore>(
    listener: TcpListener,
    context: Arc<ServerContext<S>>,
) -> io::Result<()> {
    let server = Server::new(listener);
    let context = &context;

    let new_service = |_socket_addr: SocketAddr| Ok(Some(ModbusService::new(Arc::clone(context))));
    let on_connected = |stream: TcpStream, socket_addr: SocketAddr| async move {
        debug!(peer = %socket_addr, "Modbus client connected");
        accept_tcp_connection(stream, socket_addr, new_service)
    };
    let on_process_error = |err: io::Error| {
        error!(error = %err, "Modbus connection failed");
    };

    server.serve(&on_connected, on_process_error).await
}

/// Bind `address` and serve `context` on it.
pub async fn serve<S: RegisterStore>(
    address: SocketAddr,
    context: Arc<ServerContext<S>>,
) -> io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(
        %address,
        units = ?context.unit_ids().collect::<Vec<_>>(),
        "Modbus listener started"
    );
    serve_listener(listener, context).await
}

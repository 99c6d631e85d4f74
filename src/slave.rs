//! Inverter-facing emulated meter.

use std::future;
use std::io;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_modbus::server::rtu::Server;
use tokio_modbus::server::{Service, Terminated};
use tokio_modbus::{Exception, Request, Response, SlaveRequest};
use tokio_serial::SerialStream;

use crate::registers::{IMAGE_BLOCK_START, IMAGE_BLOCK_WORDS, IMAGE_LEN};

/// Register image served to the inverter.
///
/// The measurement cycle replaces the whole block in one step, so a
/// concurrent poll sees either the old image or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct MeterImage {
    words: Arc<Mutex<[u16; IMAGE_LEN]>>,
}

impl MeterImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly encoded block.
    pub fn store(&self, words: [u16; IMAGE_LEN]) {
        *self.words.lock().unwrap() = words;
    }

    pub fn snapshot(&self) -> [u16; IMAGE_LEN] {
        *self.words.lock().unwrap()
    }

    fn read(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, Exception> {
        if cnt == 0 {
            return Err(Exception::IllegalDataValue);
        }
        let end = addr.checked_add(cnt).ok_or(Exception::IllegalDataAddress)?;
        if addr < IMAGE_BLOCK_START || end > IMAGE_BLOCK_START + IMAGE_BLOCK_WORDS {
            return Err(Exception::IllegalDataAddress);
        }
        let offset = usize::from(addr - IMAGE_BLOCK_START);
        let words = self.words.lock().unwrap();
        Ok(words[offset..offset + usize::from(cnt)].to_vec())
    }
}

/// Serves the image as input registers on one slave address.
///
/// A request addressed to any other slave belongs to another device on the
/// bus and gets no response at all.
pub struct ImageService {
    slave_id: u8,
    image: MeterImage,
}

impl ImageService {
    pub fn new(slave_id: u8, image: MeterImage) -> Self {
        Self { slave_id, image }
    }
}

impl Service for ImageService {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = Exception;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        if req.slave != self.slave_id {
            return future::ready(Ok(None));
        }
        let result = match req.request {
            Request::ReadInputRegisters(addr, cnt) => self
                .image
                .read(addr, cnt)
                .map(|words| Some(Response::ReadInputRegisters(words))),
            _ => Err(Exception::IllegalFunction),
        };
        future::ready(result)
    }
}

/// Answer inverter polls until `shutdown` resolves, then release the port.
pub async fn serve(
    serial: SerialStream,
    service: ImageService,
    shutdown: oneshot::Receiver<()>,
) -> io::Result<Terminated> {
    let server = Server::new(serial);
    server.serve_until(service, shutdown.map(|_| ())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn poll(
        service: &ImageService,
        slave: u8,
        request: Request<'static>,
    ) -> <ImageService as Service>::Future {
        service.call(SlaveRequest { slave, request })
    }

    fn image_with_pattern() -> MeterImage {
        let image = MeterImage::new();
        let mut words = [0u16; IMAGE_LEN];
        for (i, word) in words.iter_mut().enumerate() {
            *word = i as u16 + 100;
        }
        image.store(words);
        image
    }

    #[test]
    fn test_full_block_poll_returns_stored_image() {
        let image = image_with_pattern();
        let service = ImageService::new(1, image.clone());

        let response = tokio_test::block_on(poll(
            &service,
            1,
            Request::ReadInputRegisters(IMAGE_BLOCK_START, IMAGE_BLOCK_WORDS),
        ));

        assert_eq!(
            response,
            Ok(Some(Response::ReadInputRegisters(
                image.snapshot().to_vec()
            )))
        );
    }

    #[test]
    fn test_partial_poll_returns_slice() {
        let service = ImageService::new(1, image_with_pattern());

        let response = tokio_test::block_on(poll(
            &service,
            1,
            Request::ReadInputRegisters(IMAGE_BLOCK_START + 2, 2),
        ));

        assert_eq!(
            response,
            Ok(Some(Response::ReadInputRegisters(vec![102, 103])))
        );
    }

    #[test]
    fn test_foreign_slave_gets_no_response() {
        let service = ImageService::new(1, image_with_pattern());

        let response = tokio_test::block_on(poll(
            &service,
            7,
            Request::ReadInputRegisters(IMAGE_BLOCK_START, IMAGE_BLOCK_WORDS),
        ));

        assert_eq!(response, Ok(None));
    }

    #[test]
    fn test_out_of_range_poll_is_rejected() {
        let service = ImageService::new(1, image_with_pattern());

        let polls = [
            (0u16, 18u16),
            (IMAGE_BLOCK_START, IMAGE_BLOCK_WORDS + 1),
            (29, 2),
            (u16::MAX, 2),
        ];
        for (addr, cnt) in polls {
            let response =
                tokio_test::block_on(poll(&service, 1, Request::ReadInputRegisters(addr, cnt)));

            assert_eq!(
                response,
                Err(Exception::IllegalDataAddress),
                "addr={addr} cnt={cnt}"
            );
        }
    }

    #[test]
    fn test_unsupported_function_is_rejected() {
        let service = ImageService::new(1, image_with_pattern());

        let response = tokio_test::block_on(poll(
            &service,
            1,
            Request::ReadHoldingRegisters(IMAGE_BLOCK_START, 2),
        ));

        assert_eq!(response, Err(Exception::IllegalFunction));
    }

    #[test]
    fn test_store_replaces_whole_image() {
        let image = image_with_pattern();

        image.store([7u16; IMAGE_LEN]);

        assert_eq!(image.snapshot(), [7u16; IMAGE_LEN]);
    }
}

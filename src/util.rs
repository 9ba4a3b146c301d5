//! # MQTT Serialization Utilities
//!
//! Helpers for reading and writing MQTT-specific data types from and to byte
//! buffers, such as variable-byte integers and length-prefixed strings, plus
//! frame detection for stream transports.

use crate::error::{PacketError, ProtocolError};

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is the encoding MQTT uses for the remaining-length field.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, PacketError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let encoded_byte = buf
            .get(*cursor + i)
            .ok_or(ProtocolError::MalformedPacket)?;
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(ProtocolError::MalformedPacket.into());
        }
    }
    *cursor += i + 1;
    Ok(value)
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer_len(buf: &mut [u8], mut val: usize) -> Result<usize, PacketError> {
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(PacketError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Reads length-prefixed binary data from the buffer.
pub fn read_binary<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a [u8], PacketError> {
    let len = read_u16(cursor, buf)? as usize;
    let data = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += len;
    Ok(data)
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, PacketError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(buf: &mut [u8], s: &str) -> Result<usize, PacketError> {
    write_binary(buf, s.as_bytes())
}

/// Writes length-prefixed binary data to the buffer.
pub fn write_binary(buf: &mut [u8], data: &[u8]) -> Result<usize, PacketError> {
    let len = data.len();
    if len > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge.into());
    }
    let len_bytes = (len as u16).to_be_bytes();

    let required_space = 2 + len;
    let slice = buf
        .get_mut(0..required_space)
        .ok_or(PacketError::BufferTooSmall)?;

    slice[0..2].copy_from_slice(&len_bytes);
    slice[2..].copy_from_slice(data);
    Ok(required_space)
}

/// Returns the total size of the frame starting at `buf[0]`, once its header is in.
///
/// The frame itself may still be incomplete. `Ok(None)` means the remaining
/// length field has not fully arrived yet.
pub fn frame_size(buf: &[u8]) -> Result<Option<usize>, PacketError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let mut cursor = 1;
    match read_variable_byte_integer(&mut cursor, buf) {
        Ok(remaining) => Ok(Some(cursor + remaining)),
        // The length field itself may still be arriving.
        Err(_) if buf.len() < 5 => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns the total length of the first complete packet in `buf`.
///
/// `Ok(None)` means more bytes are needed before the whole frame is in.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, PacketError> {
    Ok(frame_size(buf)?.filter(|&total| buf.len() >= total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_byte_integer_uses_continuation_bits() {
        let mut buf = [0u8; 4];
        let n = write_variable_byte_integer_len(&mut buf, 321).unwrap();
        assert_eq!(&buf[..n], &[0xC1, 0x02]);

        let mut cursor = 0;
        assert_eq!(read_variable_byte_integer(&mut cursor, &buf).unwrap(), 321);
        assert_eq!(cursor, 2);
    }

    #[test]
    fn variable_byte_integer_rejects_five_byte_lengths() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut cursor = 0;
        assert_eq!(
            read_variable_byte_integer(&mut cursor, &buf),
            Err(PacketError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn truncated_binary_is_malformed() {
        let buf = [0x00, 0x05, b'a', b'b'];
        let mut cursor = 0;
        assert_eq!(
            read_binary(&mut cursor, &buf),
            Err(PacketError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn string_write_needs_room_for_prefix() {
        let mut buf = [0u8; 3];
        assert_eq!(
            write_utf8_string(&mut buf, "abc"),
            Err(PacketError::BufferTooSmall)
        );
    }

    #[test]
    fn frame_len_waits_for_the_whole_packet() {
        assert_eq!(frame_len(&[0x30]).unwrap(), None);
        assert_eq!(frame_len(&[0x30, 0x03, 0x00]).unwrap(), None);
        assert_eq!(frame_len(&[0x30, 0x03, 0x00, 0x01, b'a']).unwrap(), Some(5));
        assert_eq!(frame_len(&[0xD0, 0x00, 0x30]).unwrap(), Some(2));
        // Continuation bit set but length byte not yet received.
        assert_eq!(frame_len(&[0x30, 0x80]).unwrap(), None);
    }

    #[test]
    fn frame_size_is_known_before_the_frame_is_complete() {
        assert_eq!(frame_size(&[0x30]).unwrap(), None);
        assert_eq!(frame_size(&[0x30, 0x03, 0x00]).unwrap(), Some(5));
        assert_eq!(frame_size(&[0x30, 0xC1, 0x02]).unwrap(), Some(324));
        assert_eq!(frame_len(&[0x30, 0xC1, 0x02]).unwrap(), None);
    }
}

pub trait ByteLength {
    fn byte_len(&self) -> usize;
}

/// Appends the binary form of a value to a buffer
pub trait IntoBytes {
    type Metadata;
    fn write_bytes(&self, buf: &mut Vec<u8>, metadata: Self::Metadata);
}

pub trait ParseFromBytes<'a>: Sized {
    type Error;
    type Metadata;
    fn from_bytes(
        bytes: &'a [u8],
        metadata: Self::Metadata,
    ) -> Result<(Self, &'a [u8]), Self::Error>;
}

//! Bridges `modular-bitfield` flag words into binrw streams.

/// Implements [`binrw::BinRead`] and [`binrw::BinWrite`] for a
/// `modular_bitfield::bitfield` type of the given byte width.
///
/// Bitfield storage is little-endian by construction (the first declared
/// field occupies the lowest bits), so big-endian streams just reverse the
/// byte order.
#[macro_export]
macro_rules! impl_binrw_bitfield {
    ($ty:ty, $bytes:expr) => {
        impl ::binrw::BinRead for $ty {
            type Args<'a> = ();

            fn read_options<R: ::binrw::io::Read + ::binrw::io::Seek>(
                reader: &mut R,
                endian: ::binrw::Endian,
                _: Self::Args<'_>,
            ) -> ::binrw::BinResult<Self> {
                let mut buf = [0u8; $bytes];
                reader.read_exact(&mut buf)?;
                if endian == ::binrw::Endian::Big {
                    buf.reverse();
                }
                Ok(<$ty>::from_bytes(buf))
            }
        }

        impl ::binrw::BinWrite for $ty {
            type Args<'a> = ();

            fn write_options<W: ::binrw::io::Write + ::binrw::io::Seek>(
                &self,
                writer: &mut W,
                endian: ::binrw::Endian,
                _: Self::Args<'_>,
            ) -> ::binrw::BinResult<()> {
                let mut buf = (*self).into_bytes();
                if endian == ::binrw::Endian::Big {
                    buf.reverse();
                }
                writer.write_all(&buf)?;
                Ok(())
            }
        }
    };
}

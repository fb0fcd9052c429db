/// Construct a BSON value.
///
/// Any expression convertible with `Into<Bson>` is accepted; array and
/// document literals nest.
#[macro_export]
macro_rules! bson {
    ([]) => {{ $crate::Bson::Array(Vec::new()) }};

    ([$($val:tt),*]) => {{
        let mut array = Vec::new();

        $(
            array.push($crate::bson!($val));
        )*

        $crate::Bson::Array(array)
    }};

    ({ $($k:expr => $v:tt),* }) => {{
        $crate::Bson::Document($crate::doc! {
            $(
                $k => $v
            ),*
        })
    }};

    ($val:expr) => {{
        ::std::convert::Into::<$crate::Bson>::into($val)
    }};
}

/// Construct an ordered BSON [`Document`](crate::Document).
///
/// ```
/// use mongowire::doc;
///
/// let doc = doc! {
///     "hello" => "world",
///     "count" => 5,
///     "nested" => { "flag" => true }
/// };
/// assert_eq!(doc.get_str("hello"), Some("world"));
/// ```
#[macro_export]
macro_rules! doc {
    () => {{ $crate::Document::new() }};

    ( $($key:expr => $val:tt),* ) => {{
        let mut document = $crate::Document::new();

        $(
            document.insert($key, $crate::bson!($val));
        )*

        document
    }};

    ( $($key:expr => $val:tt),+ , ) => {{
        $crate::doc! { $($key => $val),+ }
    }};
}

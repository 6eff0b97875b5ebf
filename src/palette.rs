use raqote::{SolidSource, Source};
use serde::{de, Deserialize, Deserializer};
use serde::de::Visitor;

/// Straight (not premultiplied) RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// CSS named colors.
const NAMED_COLORS: &[(&str, Color)] = &[
    ("aliceblue", Color::rgb(0xf0, 0xf8, 0xff)),
    ("antiquewhite", Color::rgb(0xfa, 0xeb, 0xd7)),
    ("aqua", Color::rgb(0x00, 0xff, 0xff)),
    ("aquamarine", Color::rgb(0x7f, 0xff, 0xd4)),
    ("azure", Color::rgb(0xf0, 0xff, 0xff)),
    ("beige", Color::rgb(0xf5, 0xf5, 0xdc)),
    ("bisque", Color::rgb(0xff, 0xe4, 0xc4)),
    ("black", Color::rgb(0x00, 0x00, 0x00)),
    ("blanchedalmond", Color::rgb(0xff, 0xeb, 0xcd)),
    ("blue", Color::rgb(0x00, 0x00, 0xff)),
    ("blueviolet", Color::rgb(0x8a, 0x2b, 0xe2)),
    ("brown", Color::rgb(0xa5, 0x2a, 0x2a)),
    ("burlywood", Color::rgb(0xde, 0xb8, 0x87)),
    ("cadetblue", Color::rgb(0x5f, 0x9e, 0xa0)),
    ("chartreuse", Color::rgb(0x7f, 0xff, 0x00)),
    ("chocolate", Color::rgb(0xd2, 0x69, 0x1e)),
    ("coral", Color::rgb(0xff, 0x7f, 0x50)),
    ("cornflowerblue", Color::rgb(0x64, 0x95, 0xed)),
    ("cornsilk", Color::rgb(0xff, 0xf8, 0xdc)),
    ("crimson", Color::rgb(0xdc, 0x14, 0x3c)),
    ("cyan", Color::rgb(0x00, 0xff, 0xff)),
    ("darkblue", Color::rgb(0x00, 0x00, 0x8b)),
    ("darkcyan", Color::rgb(0x00, 0x8b, 0x8b)),
    ("darkgoldenrod", Color::rgb(0xb8, 0x86, 0x0b)),
    ("darkgray", Color::rgb(0xa9, 0xa9, 0xa9)),
    ("darkgreen", Color::rgb(0x00, 0x64, 0x00)),
    ("darkgrey", Color::rgb(0xa9, 0xa9, 0xa9)),
    ("darkkhaki", Color::rgb(0xbd, 0xb7, 0x6b)),
    ("darkmagenta", Color::rgb(0x8b, 0x00, 0x8b)),
    ("darkolivegreen", Color::rgb(0x55, 0x6b, 0x2f)),
    ("darkorange", Color::rgb(0xff, 0x8c, 0x00)),
    ("darkorchid", Color::rgb(0x99, 0x32, 0xcc)),
    ("darkred", Color::rgb(0x8b, 0x00, 0x00)),
    ("darksalmon", Color::rgb(0xe9, 0x96, 0x7a)),
    ("darkseagreen", Color::rgb(0x8f, 0xbc, 0x8f)),
    ("darkslateblue", Color::rgb(0x48, 0x3d, 0x8b)),
    ("darkslategray", Color::rgb(0x2f, 0x4f, 0x4f)),
    ("darkslategrey", Color::rgb(0x2f, 0x4f, 0x4f)),
    ("darkturquoise", Color::rgb(0x00, 0xce, 0xd1)),
    ("darkviolet", Color::rgb(0x94, 0x00, 0xd3)),
    ("deeppink", Color::rgb(0xff, 0x14, 0x93)),
    ("deepskyblue", Color::rgb(0x00, 0xbf, 0xff)),
    ("dimgray", Color::rgb(0x69, 0x69, 0x69)),
    ("dimgrey", Color::rgb(0x69, 0x69, 0x69)),
    ("dodgerblue", Color::rgb(0x1e, 0x90, 0xff)),
    ("firebrick", Color::rgb(0xb2, 0x22, 0x22)),
    ("floralwhite", Color::rgb(0xff, 0xfa, 0xf0)),
    ("forestgreen", Color::rgb(0x22, 0x8b, 0x22)),
    ("fuchsia", Color::rgb(0xff, 0x00, 0xff)),
    ("gainsboro", Color::rgb(0xdc, 0xdc, 0xdc)),
    ("ghostwhite", Color::rgb(0xf8, 0xf8, 0xff)),
    ("gold", Color::rgb(0xff, 0xd7, 0x00)),
    ("goldenrod", Color::rgb(0xda, 0xa5, 0x20)),
    ("gray", Color::rgb(0x80, 0x80, 0x80)),
    ("green", Color::rgb(0x00, 0x80, 0x00)),
    ("greenyellow", Color::rgb(0xad, 0xff, 0x2f)),
    ("grey", Color::rgb(0x80, 0x80, 0x80)),
    ("honeydew", Color::rgb(0xf0, 0xff, 0xf0)),
    ("hotpink", Color::rgb(0xff, 0x69, 0xb4)),
    ("indianred", Color::rgb(0xcd, 0x5c, 0x5c)),
    ("indigo", Color::rgb(0x4b, 0x00, 0x82)),
    ("ivory", Color::rgb(0xff, 0xff, 0xf0)),
    ("khaki", Color::rgb(0xf0, 0xe6, 0x8c)),
    ("lavender", Color::rgb(0xe6, 0xe6, 0xfa)),
    ("lavenderblush", Color::rgb(0xff, 0xf0, 0xf5)),
    ("lawngreen", Color::rgb(0x7c, 0xfc, 0x00)),
    ("lemonchiffon", Color::rgb(0xff, 0xfa, 0xcd)),
    ("lightblue", Color::rgb(0xad, 0xd8, 0xe6)),
    ("lightcoral", Color::rgb(0xf0, 0x80, 0x80)),
    ("lightcyan", Color::rgb(0xe0, 0xff, 0xff)),
    ("lightgoldenrodyellow", Color::rgb(0xfa, 0xfa, 0xd2)),
    ("lightgray", Color::rgb(0xd3, 0xd3, 0xd3)),
    ("lightgreen", Color::rgb(0x90, 0xee, 0x90)),
    ("lightgrey", Color::rgb(0xd3, 0xd3, 0xd3)),
    ("lightpink", Color::rgb(0xff, 0xb6, 0xc1)),
    ("lightsalmon", Color::rgb(0xff, 0xa0, 0x7a)),
    ("lightseagreen", Color::rgb(0x20, 0xb2, 0xaa)),
    ("lightskyblue", Color::rgb(0x87, 0xce, 0xfa)),
    ("lightslategray", Color::rgb(0x77, 0x88, 0x99)),
    ("lightslategrey", Color::rgb(0x77, 0x88, 0x99)),
    ("lightsteelblue", Color::rgb(0xb0, 0xc4, 0xde)),
    ("lightyellow", Color::rgb(0xff, 0xff, 0xe0)),
    ("lime", Color::rgb(0x00, 0xff, 0x00)),
    ("limegreen", Color::rgb(0x32, 0xcd, 0x32)),
    ("linen", Color::rgb(0xfa, 0xf0, 0xe6)),
    ("magenta", Color::rgb(0xff, 0x00, 0xff)),
    ("maroon", Color::rgb(0x80, 0x00, 0x00)),
    ("mediumaquamarine", Color::rgb(0x66, 0xcd, 0xaa)),
    ("mediumblue", Color::rgb(0x00, 0x00, 0xcd)),
    ("mediumorchid", Color::rgb(0xba, 0x55, 0xd3)),
    ("mediumpurple", Color::rgb(0x93, 0x70, 0xdb)),
    ("mediumseagreen", Color::rgb(0x3c, 0xb3, 0x71)),
    ("mediumslateblue", Color::rgb(0x7b, 0x68, 0xee)),
    ("mediumspringgreen", Color::rgb(0x00, 0xfa, 0x9a)),
    ("mediumturquoise", Color::rgb(0x48, 0xd1, 0xcc)),
    ("mediumvioletred", Color::rgb(0xc7, 0x15, 0x85)),
    ("midnightblue", Color::rgb(0x19, 0x19, 0x70)),
    ("mintcream", Color::rgb(0xf5, 0xff, 0xfa)),
    ("mistyrose", Color::rgb(0xff, 0xe4, 0xe1)),
    ("moccasin", Color::rgb(0xff, 0xe4, 0xb5)),
    ("navajowhite", Color::rgb(0xff, 0xde, 0xad)),
    ("navy", Color::rgb(0x00, 0x00, 0x80)),
    ("oldlace", Color::rgb(0xfd, 0xf5, 0xe6)),
    ("olive", Color::rgb(0x80, 0x80, 0x00)),
    ("olivedrab", Color::rgb(0x6b, 0x8e, 0x23)),
    ("orange", Color::rgb(0xff, 0xa5, 0x00)),
    ("orangered", Color::rgb(0xff, 0x45, 0x00)),
    ("orchid", Color::rgb(0xda, 0x70, 0xd6)),
    ("palegoldenrod", Color::rgb(0xee, 0xe8, 0xaa)),
    ("palegreen", Color::rgb(0x98, 0xfb, 0x98)),
    ("paleturquoise", Color::rgb(0xaf, 0xee, 0xee)),
    ("palevioletred", Color::rgb(0xdb, 0x70, 0x93)),
    ("papayawhip", Color::rgb(0xff, 0xef, 0xd5)),
    ("peachpuff", Color::rgb(0xff, 0xda, 0xb9)),
    ("peru", Color::rgb(0xcd, 0x85, 0x3f)),
    ("pink", Color::rgb(0xff, 0xc0, 0xcb)),
    ("plum", Color::rgb(0xdd, 0xa0, 0xdd)),
    ("powderblue", Color::rgb(0xb0, 0xe0, 0xe6)),
    ("purple", Color::rgb(0x80, 0x00, 0x80)),
    ("rebeccapurple", Color::rgb(0x66, 0x33, 0x99)),
    ("red", Color::rgb(0xff, 0x00, 0x00)),
    ("rosybrown", Color::rgb(0xbc, 0x8f, 0x8f)),
    ("royalblue", Color::rgb(0x41, 0x69, 0xe1)),
    ("saddlebrown", Color::rgb(0x8b, 0x45, 0x13)),
    ("salmon", Color::rgb(0xfa, 0x80, 0x72)),
    ("sandybrown", Color::rgb(0xf4, 0xa4, 0x60)),
    ("seagreen", Color::rgb(0x2e, 0x8b, 0x57)),
    ("seashell", Color::rgb(0xff, 0xf5, 0xee)),
    ("sienna", Color::rgb(0xa0, 0x52, 0x2d)),
    ("silver", Color::rgb(0xc0, 0xc0, 0xc0)),
    ("skyblue", Color::rgb(0x87, 0xce, 0xeb)),
    ("slateblue", Color::rgb(0x6a, 0x5a, 0xcd)),
    ("slategray", Color::rgb(0x70, 0x80, 0x90)),
    ("slategrey", Color::rgb(0x70, 0x80, 0x90)),
    ("snow", Color::rgb(0xff, 0xfa, 0xfa)),
    ("springgreen", Color::rgb(0x00, 0xff, 0x7f)),
    ("steelblue", Color::rgb(0x46, 0x82, 0xb4)),
    ("tan", Color::rgb(0xd2, 0xb4, 0x8c)),
    ("teal", Color::rgb(0x00, 0x80, 0x80)),
    ("thistle", Color::rgb(0xd8, 0xbf, 0xd8)),
    ("tomato", Color::rgb(0xff, 0x63, 0x47)),
    ("turquoise", Color::rgb(0x40, 0xe0, 0xd0)),
    ("violet", Color::rgb(0xee, 0x82, 0xee)),
    ("wheat", Color::rgb(0xf5, 0xde, 0xb3)),
    ("white", Color::rgb(0xff, 0xff, 0xff)),
    ("whitesmoke", Color::rgb(0xf5, 0xf5, 0xf5)),
    ("yellow", Color::rgb(0xff, 0xff, 0x00)),
    ("yellowgreen", Color::rgb(0x9a, 0xcd, 0x32)),
    ("transparent", Color { r: 0, g: 0, b: 0, a: 0 }),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color { r, g, b, a: 0xff }
    }

    /// Accepts `#rgb`, `#rrggbb`, `#rrggbbaa` and the CSS color names.
    pub fn parse(string: &str) -> Option<Color> {
        let string = string.trim();
        let Some(hex) = string.strip_prefix('#') else {
            let lower = string.to_ascii_lowercase();
            return NAMED_COLORS
                .iter()
                .find(|(name, _)| *name == lower)
                .map(|(_, color)| *color);
        };
        if !hex.bytes().all(|digit| digit.is_ascii_hexdigit()) {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 0x11);
        match hex.len() {
            3 => Some(Color::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
            6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Color {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a: byte(6)?,
            }),
            _ => None,
        }
    }

    /// Per-channel linear blend from `self` (at 0) to `other` (at 1).
    pub fn lerp(&self, other: &Color, fraction: f64) -> Color {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let channel = |from: u8, to: u8| {
            let value = from as f64 + (to as f64 - from as f64) * fraction;
            value.clamp(0.0, 255.0) as u8
        };
        Color {
            r: channel(self.r, other.r),
            g: channel(self.g, other.g),
            b: channel(self.b, other.b),
            a: channel(self.a, other.a),
        }
    }

    pub fn to_solid(&self) -> SolidSource {
        SolidSource::from_unpremultiplied_argb(self.a, self.r, self.g, self.b)
    }

    pub fn to_source(&self) -> Source<'static> {
        Source::Solid(self.to_solid())
    }
}

struct ColorVisitor;

impl<'de> Visitor<'de> for ColorVisitor {
    type Value = Color;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a '#rgb', '#rrggbb' or '#rrggbbaa' string, or a color name")
    }

    fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
        Color::parse(string).ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(string), &self))
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Palette {
    pub main: Color,
    pub secondary: Color,
    pub background: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Palette {
            main: Color::rgb(0x00, 0x64, 0x00),
            secondary: Color::rgb(0x41, 0x69, 0xe1),
            background: Color::rgb(0xff, 0xff, 0xff),
        }
    }
}

impl Palette {
    pub fn mix(&self, fraction: f64) -> Color {
        self.main.lerp(&self.secondary, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_names() {
        assert_eq!(Color::parse("#4169e1"), Some(Color::rgb(0x41, 0x69, 0xe1)));
        assert_eq!(Color::parse("#fff"), Some(Color::rgb(0xff, 0xff, 0xff)));
        assert_eq!(
            Color::parse("#11223380"),
            Some(Color { r: 0x11, g: 0x22, b: 0x33, a: 0x80 })
        );
        assert_eq!(Color::parse("RoyalBlue"), Color::parse("#4169E1"));
        assert_eq!(Color::parse("#12345"), None);
        assert_eq!(Color::parse("#gggggg"), None);
        assert_eq!(Color::parse("chartreuse-ish"), None);
    }

    #[test]
    fn accepts_every_css_name() {
        assert_eq!(NAMED_COLORS.len(), 149);
        assert_eq!(Color::parse("rebeccapurple"), Some(Color::rgb(0x66, 0x33, 0x99)));
        assert_eq!(Color::parse("LightGoldenrodYellow"), Some(Color::rgb(0xfa, 0xfa, 0xd2)));
        assert_eq!(Color::parse("grey"), Color::parse("gray"));
        assert_eq!(Color::parse("transparent").map(|color| color.a), Some(0));
    }

    #[test]
    fn rejects_signs_in_hex_digits() {
        assert_eq!(Color::parse("#+f+f+f"), None);
        assert_eq!(Color::parse("#+ff+ff+ff"), None);
        assert_eq!(Color::parse("#-1-1-1"), None);
        assert_eq!(Color::parse("#ff é"), None);
    }

    #[test]
    fn mix_endpoints_are_exact() {
        let palette = Palette {
            main: Color { r: 10, g: 200, b: 30, a: 255 },
            secondary: Color { r: 250, g: 0, b: 90, a: 128 },
            background: Color::rgb(0, 0, 0),
        };
        assert_eq!(palette.mix(0.0), palette.main);
        assert_eq!(palette.mix(1.0), palette.secondary);
        assert_eq!(palette.mix(-3.0), palette.main);
        assert_eq!(palette.mix(7.0), palette.secondary);
        assert_eq!(palette.mix(0.5), Color { r: 130, g: 100, b: 60, a: 191 });
    }

    #[test]
    fn palette_deserializes_with_defaults() {
        let palette: Palette = serde_json::from_str(r##"{"main": "navy", "background": "#000000"}"##).unwrap();
        assert_eq!(palette.main, Color::rgb(0, 0, 0x80));
        assert_eq!(palette.secondary, Palette::default().secondary);
        assert_eq!(palette.background, Color::rgb(0, 0, 0));

        assert!(serde_json::from_str::<Palette>(r##"{"main": "#xyz"}"##).is_err());
    }
}
